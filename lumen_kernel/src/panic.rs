//! Kernel panic handler.

#[cfg(not(test))]
#[panic_handler]
fn panic(panic_info: &core::panic::PanicInfo) -> ! {
    use crate::serial::{SerialPort, COM1, COM1_ADDR};
    use core::fmt::Write;

    fn write_panic(port: &mut SerialPort, panic_info: &core::panic::PanicInfo) {
        let _ = writeln!(port, "\nKERNEL PANIC: {}", panic_info);
    }

    // The lock may be held by the code that panicked. Output is garbled then, but it gets out.
    match COM1.try_lock() {
        Some(mut com1) => write_panic(&mut com1, panic_info),
        None => write_panic(&mut unsafe { SerialPort::new(COM1_ADDR) }, panic_info),
    }

    unsafe {
        amd64::cpu::disable_interrupts();
        amd64::cpu::hang()
    }
}
