//! Starting the application processors.
//!
//! Every processor other than the boot processor receives an INIT IPI, then
//! after a settle time a STARTUP IPI pointing at the real mode trampoline.
//! A woken processor reports back through [`ApLiveness`].

use crate::config::KernelConfig;
use crate::platform::Cpu;

use amd64::apic::{ApicError, ApicId, LocalApic};
use amd64::mmio::RegisterWindow;
use amd64::pit;

use core::sync::atomic::{AtomicBool, Ordering};

/// Physical page (in 4 KiB units) holding the AP trampoline, sent as the STARTUP vector.
pub const TRAMPOLINE_PAGE: u8 = 0x08;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SmpError {
    #[error("IPI delivery failed: {0}")]
    Ipi(#[from] ApicError),
}

/// Sending the start-up inter-processor interrupts.
pub trait InterProcessorInterrupts {
    /// APIC id of the executing processor.
    fn own_id(&self) -> ApicId;
    fn send_init(&self, target: ApicId) -> Result<(), ApicError>;
    fn send_startup(&self, target: ApicId, vector: u8) -> Result<(), ApicError>;
}

impl<W: RegisterWindow> InterProcessorInterrupts for LocalApic<W> {
    fn own_id(&self) -> ApicId {
        self.id()
    }

    fn send_init(&self, target: ApicId) -> Result<(), ApicError> {
        LocalApic::send_init(self, target)
    }

    fn send_startup(&self, target: ApicId, vector: u8) -> Result<(), ApicError> {
        LocalApic::send_startup(self, target, vector)
    }
}

pub trait Delay {
    fn delay_ms(&self, ms: u64);
}

/// Busy waits on channel 2 of the PIT.
pub struct PitDelay(());

impl PitDelay {
    /// # Safety
    ///
    /// Nothing else may use PIT channel 2 while this exists.
    pub unsafe fn new() -> PitDelay {
        PitDelay(())
    }
}

impl Delay for PitDelay {
    fn delay_ms(&self, ms: u64) {
        unsafe { pit::busy_wait_us(ms.saturating_mul(1000)) }
    }
}

/// One flag per possible APIC id, set by the processor itself once it runs kernel code.
pub struct ApLiveness {
    alive: [AtomicBool; 256],
}

impl ApLiveness {
    pub const fn new() -> ApLiveness {
        ApLiveness { alive: [const { AtomicBool::new(false) }; 256] }
    }

    pub fn mark_alive(&self, apic_id: ApicId) {
        self.alive[apic_id.0 as usize].store(true, Ordering::Release);
    }

    pub fn is_alive(&self, apic_id: ApicId) -> bool {
        self.alive[apic_id.0 as usize].load(Ordering::Acquire)
    }

    fn count_alive(&self, ids: impl Iterator<Item = ApicId>) -> usize {
        ids.filter(|&id| self.is_alive(id)).count()
    }
}

impl Default for ApLiveness {
    fn default() -> ApLiveness {
        ApLiveness::new()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BringUpReport {
    pub bsp: ApicId,
    /// Processors that were sent INIT and STARTUP.
    pub started: usize,
    /// Started processors that checked in before the timeout.
    pub responsive: usize,
}

/// Run INIT, delay, STARTUP for every processor in `cpus` except the executing one,
/// then wait up to `ap_timeout_ms` for them to check in.
pub fn bring_up<I, D>(
    ipi: &I,
    delay: &D,
    cpus: &[Cpu],
    liveness: &ApLiveness,
    config: &KernelConfig,
) -> Result<BringUpReport, SmpError>
where
    I: InterProcessorInterrupts + ?Sized,
    D: Delay + ?Sized,
{
    let bsp = ipi.own_id();
    liveness.mark_alive(bsp);
    info!("SMP: boot processor is APIC {}", bsp);

    let targets = || cpus.iter().map(|cpu| cpu.apic_id).filter(move |&id| id != bsp);
    let started = targets().count();
    if started == 0 {
        info!("SMP: no application processors");
        return Ok(BringUpReport { bsp, started, responsive: 0 });
    }

    for id in targets() {
        debug!("SMP: INIT -> {}", id);
        ipi.send_init(id)?;
    }

    delay.delay_ms(config.smp_init_delay_ms);

    for id in targets() {
        debug!("SMP: STARTUP({:#04x}) -> {}", TRAMPOLINE_PAGE, id);
        ipi.send_startup(id, TRAMPOLINE_PAGE)?;
    }

    let mut responsive = liveness.count_alive(targets());
    let mut waited_ms = 0;
    while responsive < started && waited_ms < config.smp_ap_timeout_ms {
        delay.delay_ms(1);
        waited_ms += 1;
        responsive = liveness.count_alive(targets());
    }

    if responsive < started {
        for id in targets().filter(|&id| !liveness.is_alive(id)) {
            warn!("SMP: APIC {} did not respond within {} ms", id, config.smp_ap_timeout_ms);
        }
    }
    info!("SMP: {} of {} application processors online", responsive, started);

    Ok(BringUpReport { bsp, started, responsive })
}
