//! # CPU Mode Report
//!
//! Logs the control registers that decide how the kernel finds the machine:
//! paging, PAE and long mode are all expected to be on under UEFI.

use bitfield_struct::bitfield;
use log::info;

/// CR0, reduced to the bits the report cares about.
#[bitfield(u64)]
pub struct Cr0 {
    /// Bit 0: Protection Enable.
    pub pe: bool,
    #[bits(15)]
    __: u16,
    /// Bit 16: Write Protect.
    pub wp: bool,
    #[bits(14)]
    __: u16,
    /// Bit 31: Paging.
    pub pg: bool,
    #[bits(32)]
    __: u32,
}

#[bitfield(u64)]
pub struct Cr4 {
    #[bits(5)]
    __: u8,
    /// Bit 5: Physical Address Extension.
    pub pae: bool,
    __: bool,
    /// Bit 7: Page Global Enable.
    pub pge: bool,
    #[bits(4)]
    __: u8,
    /// Bit 12: 5-level paging.
    pub la57: bool,
    #[bits(51)]
    __: u64,
}

/// `IA32_EFER` (MSR `0xC000_0080`).
#[bitfield(u64)]
pub struct Efer {
    /// Bit 0: System Call Extensions.
    pub sce: bool,
    #[bits(7)]
    __: u8,
    /// Bit 8: Long Mode Enable.
    pub lme: bool,
    __: bool,
    /// Bit 10: Long Mode Active.
    pub lma: bool,
    /// Bit 11: No-Execute Enable.
    pub nxe: bool,
    #[bits(52)]
    __: u64,
}

const IA32_EFER: u32 = 0xC000_0080;

#[derive(Debug, Copy, Clone)]
pub struct CpuModes {
    pub cr0: Cr0,
    pub cr3: u64,
    pub cr4: Cr4,
    pub efer: Efer,
}

impl CpuModes {
    /// Reads the current control registers.
    ///
    /// # Safety
    /// Requires CPL 0, which is where UEFI applications run.
    pub unsafe fn read() -> Self {
        let (cr0, cr3, cr4): (u64, u64, u64);
        let (lo, hi): (u32, u32);
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
            core::arch::asm!(
                "rdmsr",
                in("ecx") IA32_EFER,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }

        Self {
            cr0: Cr0::from_bits(cr0),
            cr3,
            cr4: Cr4::from_bits(cr4),
            efer: Efer::from_bits((u64::from(hi) << 32) | u64::from(lo)),
        }
    }

    pub fn report(&self) {
        info!(
            "CR0 {:#018x}, CR3 {:#018x}, CR4 {:#018x}, EFER {:#018x}",
            self.cr0.into_bits(),
            self.cr3,
            self.cr4.into_bits(),
            self.efer.into_bits()
        );
        info!(
            "PE: {}, WP: {}, Paging: {}, PAE: {}, PGE: {}, LA57: {}",
            on_off(self.cr0.pe()),
            on_off(self.cr0.wp()),
            on_off(self.cr0.pg()),
            on_off(self.cr4.pae()),
            on_off(self.cr4.pge()),
            on_off(self.cr4.la57())
        );
        info!(
            "SCE: {}, LME: {}, LMA: {}, NXE: {}",
            on_off(self.efer.sce()),
            on_off(self.efer.lme()),
            on_off(self.efer.lma()),
            on_off(self.efer.nxe())
        );
    }
}

const fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
