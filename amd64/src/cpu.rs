//! Thin wrappers around privileged x86 instructions.

use core::arch::asm;

/// Model specific register holding the local APIC base address and enable bits.
pub const MSR_APIC_BASE: u32 = 0x1B;

/// Execute the cpuid instruction after setting eax to the given query.
#[inline]
pub fn cpuid(leaf: u32) -> (u32, u32, u32, u32) {
    // SAFETY: cpuid is available on every x86_64 processor.
    let r = unsafe { core::arch::x86_64::__cpuid(leaf) };
    (r.eax, r.ebx, r.ecx, r.edx)
}

/// Read the value of a model specific register.
#[inline]
pub unsafe fn read_msr(msr: u32) -> u64 {
    let lo: u32;
    let hi: u32;
    asm!("rdmsr", in("ecx") msr, out("eax") lo, out("edx") hi, options(nomem, nostack, preserves_flags));
    (lo as u64) | ((hi as u64) << 32)
}

#[inline]
pub unsafe fn outb(port: u16, data: u8) {
    asm!("out dx, al", in("dx") port, in("al") data, options(nomem, nostack, preserves_flags));
}

#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let data: u8;
    asm!("in al, dx", out("al") data, in("dx") port, options(nomem, nostack, preserves_flags));
    data
}

/// Disable interrupts on the current CPU.
#[inline]
pub unsafe fn disable_interrupts() {
    asm!("cli", options(nomem, nostack));
}

/// Hint to the CPU that we are inside a spin-wait loop.
#[inline(always)]
pub fn relax() {
    core::hint::spin_loop();
}

/// Pause the CPU until the next interrupt arrives.
#[inline]
pub unsafe fn hlt() {
    asm!("hlt", options(nomem, nostack, preserves_flags));
}

/// Pause the CPU indefinitely. Interrupts may still arrive,
/// depending on the interrupt flags of the CPU.
#[inline]
pub unsafe fn hang() -> ! {
    loop {
        hlt();
    }
}
