//! Bash completion for the tools
//!
//! Every tool accepts `--complete-bash` and prints a completion function built from
//! its [`clap::Command`]. Long options are completed; the argument of `--image` is
//! completed as file name, arguments of other options are not completed at all.
//!
//! ```sh
//! source <(drmtest --complete-bash)
//! ```

use std::fmt::Write as _;

use clap::Command;

/// Generates the completion script for `cmd`.
pub fn bash(cmd: &Command) -> String {
    let mut cmd = cmd.clone();
    cmd.build();
    let name = cmd.get_name().to_string();

    let mut have_image = false;
    let mut all = Vec::new();
    let mut with_arg = Vec::new();
    for arg in cmd.get_arguments() {
        let Some(long) = arg.get_long() else {
            continue;
        };
        if long == "image" {
            have_image = true;
        } else if arg.get_action().takes_values() {
            with_arg.push(format!("--{}", long));
        }
        all.push(format!("--{}", long));
    }
    if with_arg.is_empty() {
        with_arg.push("--dummy".to_string());
    }

    let mut script = String::new();
    let _ = writeln!(script, "_{}_complete()", name);
    script.push_str("{\n");
    script.push_str("    local cur prev\n");
    script.push_str("    cur=\"${COMP_WORDS[COMP_CWORD]}\"\n");
    script.push_str("    prev=\"${COMP_WORDS[COMP_CWORD-1]}\"\n");
    script.push_str("    case \"$prev\" in\n");
    if have_image {
        script.push_str("    --image)\n");
        script.push_str("        COMPREPLY=( $(compgen -f -- \"$cur\") )\n");
        script.push_str("        ;;\n");
    }
    let _ = writeln!(script, "    {})", with_arg.join(" | "));
    script.push_str("        COMPREPLY=()\n");
    script.push_str("        ;;\n");
    script.push_str("    *)\n");
    let _ = writeln!(
        script,
        "        COMPREPLY=( $(compgen -W \"{}\" -- \"$cur\") )",
        all.join(" ")
    );
    script.push_str("        ;;\n");
    script.push_str("    esac\n");
    script.push_str("    return 0\n");
    script.push_str("}\n");
    let _ = writeln!(script, "complete -F _{}_complete {}", name, name);
    script
}

#[cfg(test)]
mod tests {
    use clap::{Arg, ArgAction};

    use super::*;

    fn command() -> Command {
        Command::new("demo")
            .arg(Arg::new("autotest").short('a').long("autotest").action(ArgAction::SetTrue))
            .arg(Arg::new("card").short('c').long("card"))
            .arg(Arg::new("image").short('i').long("image"))
            .arg(Arg::new("positional"))
    }

    #[test]
    fn options_and_arguments() {
        let script = bash(&command());
        assert!(script.starts_with("_demo_complete()\n{\n"));
        assert!(script.contains("    --image)\n        COMPREPLY=( $(compgen -f -- \"$cur\") )\n"));
        assert!(script.contains("    --card)\n        COMPREPLY=()\n"));
        assert!(script.contains("compgen -W \"--autotest --card --image --help\""));
        assert!(script.ends_with("complete -F _demo_complete demo\n"));
    }

    #[test]
    fn without_arguments() {
        let cmd = Command::new("bare").arg(Arg::new("verbose").long("verbose").action(ArgAction::SetTrue));
        let script = bash(&cmd);
        assert!(script.contains("    --dummy)\n"));
        assert!(!script.contains("--image)"));
    }
}
