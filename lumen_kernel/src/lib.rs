#![cfg_attr(not(test), no_std)]
//! The lumen kernel: boot entry and early platform bring-up.

#[macro_use]
extern crate log;

macro_rules! halt {
    () => {
        loop {
            unsafe { amd64::cpu::hlt() }
        }
    };
}

pub mod cmdline;
pub mod config;
pub mod logger;
pub mod platform;
pub mod serial;
pub mod smp;

mod panic;

use crate::config::KernelConfig;
use crate::platform::{Topology, MAX_IO_APIC_COUNT};
use crate::serial::COM1;
use crate::smp::{ApLiveness, PitDelay};

use amd64::apic::{self, LocalApic};
use amd64::ioapic::IoApic;
use amd64::mem::IdentityMapped;
use amd64::{pic, PhysAddr};
use handover::{BootProtocol, HandoverRecord};

use spin::Once;

/// Boot fails below this amount of usable memory.
pub const MIN_USABLE_MEMORY: usize = 255 * 1024;

static HANDOVER: Once<HandoverRecord> = Once::new();
static LOCAL_APIC: Once<LocalApic> = Once::new();
static IO_APICS: Once<heapless::Vec<IoApic, MAX_IO_APIC_COUNT>> = Once::new();
static AP_LIVENESS: ApLiveness = ApLiveness::new();

/// Fill a write-once slot. Registering the same controller twice is a bug.
fn install_once<T>(slot: &'static Once<T>, what: &str, init: impl FnOnce() -> T) -> &'static T {
    assert!(!slot.is_completed(), "{} registered twice", what);
    slot.call_once(init)
}

/// Rust entry point, called by the boot stub with the bootloader's information pointer and magic.
#[no_mangle]
pub extern "C" fn kmain(header: usize, magic: u32) -> ! {
    COM1.lock().init();
    if logger::init(KernelConfig::DEFAULT_LOG_LEVEL).is_err() {
        COM1.lock().write(b"logger already installed\n");
    }

    let protocol = match BootProtocol::from_magic(magic) {
        Some(protocol) => protocol,
        None => panic!("Wrong bootloader please use any multiboot/stivale bootloader\n\tMagic number: {:#010x}!", magic),
    };
    info!("lumen booted by a {} loader", protocol.name());

    // SAFETY: both boot protocols leave low physical memory identity mapped.
    let mem = unsafe { IdentityMapped::new() };
    let record = match handover::parse(&mem, PhysAddr(header), magic) {
        Ok(record) => record,
        Err(err) => panic!("Cannot read the boot information: {}", err),
    };
    let handover = install_once(&HANDOVER, "handover record", || record);
    handover.dump();

    if handover.memory_usable() < MIN_USABLE_MEMORY {
        panic!(
            "Not enough memory: {} KiB usable, at least {} KiB required",
            handover.memory_usable() / 1024,
            MIN_USABLE_MEMORY / 1024
        );
    }

    let config = KernelConfig::from_cmdline(handover.command_line());
    log::set_max_level(config.log_level);
    debug!("{:?}", config);

    let topology = platform::discover(&mem, handover);
    let lapic = install_interrupt_controllers(&topology);

    if config.smp {
        // SAFETY: only the boot processor runs, nothing else touches the PIT.
        let delay = unsafe { PitDelay::new() };
        if let Err(err) = smp::bring_up(lapic, &delay, topology.cpus(), &AP_LIVENESS, &config) {
            warn!("SMP bring-up aborted: {}", err);
        }
    } else {
        info!("SMP disabled by the command line");
    }

    info!("Early bring-up done");
    halt!()
}

fn install_interrupt_controllers(topology: &Topology) -> &'static LocalApic {
    if topology.x2apic_enabled() {
        warn!("The bootloader enabled x2APIC mode, the LAPIC is still driven through its xAPIC registers");
    }
    let address = match topology.local_apic_address() {
        Some(address) => address,
        None if apic::supported() => {
            warn!("Taking the LAPIC address from the APIC base MSR");
            apic::msr_base_address()
        }
        None => panic!("No local APIC, cannot continue"),
    };

    // SAFETY: the register blocks were reported by firmware or the CPU and are identity mapped.
    let lapic = install_once(&LOCAL_APIC, "local APIC", || unsafe { LocalApic::found(address) });
    let io_apics = install_once(&IO_APICS, "I/O APICs", || {
        topology.io_apics().iter().map(|info| unsafe { IoApic::found(info.address) }).collect()
    });

    if topology.has_legacy_pics() {
        unsafe { pic::disable() };
    }
    lapic.initialize();
    info!("LAPIC {} version {:#x} initialized", lapic.id(), lapic.version());

    for ioapic in io_apics.iter() {
        ioapic.initialize();
    }
    lapic
}

/// Entry point of an application processor, reached through the real mode trampoline.
#[no_mangle]
pub extern "C" fn ap_main() -> ! {
    if let Some(lapic) = LOCAL_APIC.get() {
        let id = lapic.id();
        AP_LIVENESS.mark_alive(id);
        info!("CPU {} online", id);
    }
    halt!()
}
