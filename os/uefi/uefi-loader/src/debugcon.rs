//! # QEMU Debug Console
//!
//! Byte sink on I/O port `0x402`, captured by QEMU with `-debugcon`. Unlike the
//! UEFI console it keeps working after boot services are gone, which makes it
//! the only place log output can go between the memory map snapshot and the
//! jump into the kernel.
//!
//! On real hardware the port is unused and writes are discarded.

#[cfg(feature = "qemu")]
mod port {
    use core::fmt::{self, Write};

    const QEMU_DEBUG_PORT: u16 = 0x402;

    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn putc(c: u8) {
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct DebugCon;

    impl Write for DebugCon {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(putc);
            Ok(())
        }
    }

    #[inline]
    pub fn write(args: fmt::Arguments) {
        // Best effort; the port cannot fail.
        let _ = fmt::write(&mut DebugCon, args);
    }
}

#[cfg(not(feature = "qemu"))]
mod port {
    use core::fmt;

    #[inline]
    pub fn write(_: fmt::Arguments) {}
}

pub use port::write;

/// Writes formatted output to the debug console.
#[macro_export]
macro_rules! debugcon {
    ($($arg:tt)*) => {{
        $crate::debugcon::write(core::format_args!($($arg)*));
    }};
}
