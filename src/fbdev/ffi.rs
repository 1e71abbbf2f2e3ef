#![allow(dead_code, non_camel_case_types)]

use libc::{c_char, c_ulong};
use nix::{ioctl_read_bad, ioctl_write_int_bad, ioctl_write_ptr_bad};

pub const FB_TYPE_PACKED_PIXELS: u32 = 0;

pub const FB_VISUAL_TRUECOLOR: u32 = 2;
pub const FB_VISUAL_PSEUDOCOLOR: u32 = 3;
pub const FB_VISUAL_DIRECTCOLOR: u32 = 4;

pub const KD_TEXT: libc::c_int = 0x00;
pub const KD_GRAPHICS: libc::c_int = 0x01;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct fb_bitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fb_fix_screeninfo {
    pub id: [c_char; 16],
    pub smem_start: c_ulong,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub line_length: u32,
    pub mmio_start: c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fb_var_screeninfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: fb_bitfield,
    pub green: fb_bitfield,
    pub blue: fb_bitfield,
    pub transp: fb_bitfield,
    pub nonstd: u32,
    pub activate: u32,
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug)]
pub struct fb_cmap {
    pub start: u32,
    pub len: u32,
    pub red: *mut u16,
    pub green: *mut u16,
    pub blue: *mut u16,
    pub transp: *mut u16,
}

ioctl_read_bad!(fbioget_vscreeninfo, 0x4600, fb_var_screeninfo);
ioctl_write_ptr_bad!(fbioput_vscreeninfo, 0x4601, fb_var_screeninfo);
ioctl_read_bad!(fbioget_fscreeninfo, 0x4602, fb_fix_screeninfo);
// the kernel writes through the pointers inside the struct
ioctl_write_ptr_bad!(fbiogetcmap, 0x4604, fb_cmap);
ioctl_write_ptr_bad!(fbioputcmap, 0x4605, fb_cmap);
ioctl_write_ptr_bad!(fbiopan_display, 0x4606, fb_var_screeninfo);

ioctl_read_bad!(kd_get_mode, 0x4B3B, libc::c_int);
ioctl_write_int_bad!(kd_set_mode, 0x4B3A);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn struct_sizes() {
        assert_eq!(std::mem::size_of::<fb_fix_screeninfo>(), 80);
        assert_eq!(std::mem::size_of::<fb_var_screeninfo>(), 160);
        assert_eq!(std::mem::size_of::<fb_cmap>(), 40);
    }
}
