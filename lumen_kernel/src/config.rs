//! Settings read from the kernel command line.

use crate::cmdline::{CmdLine, Token};

use log::LevelFilter;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KernelConfig {
    /// `loglevel=<off|error|warn|info|debug|trace>`
    pub log_level: LevelFilter,
    /// Cleared by `nosmp`.
    pub smp: bool,
    /// `smp.init_delay_ms=<n>`, time between the INIT and STARTUP phases.
    pub smp_init_delay_ms: u64,
    /// `smp.ap_timeout_ms=<n>`, how long to wait for started processors to check in.
    pub smp_ap_timeout_ms: u64,
}

impl KernelConfig {
    pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;
    pub const DEFAULT_INIT_DELAY_MS: u64 = 10;
    pub const DEFAULT_AP_TIMEOUT_MS: u64 = 100;

    pub fn from_cmdline(line: &str) -> KernelConfig {
        let mut config = KernelConfig::default();
        for token in CmdLine::new(line) {
            config.apply(token);
        }
        config
    }

    fn apply(&mut self, token: Token) {
        match token {
            Token::Flag("nosmp") => self.smp = false,
            Token::Option { key: "loglevel", value } => match value.parse() {
                Ok(level) => self.log_level = level,
                Err(_) => warn!("cmdline: unknown log level '{}'", value),
            },
            Token::Option { key: key @ "smp.init_delay_ms", value } => {
                parse_millis(key, value, &mut self.smp_init_delay_ms)
            }
            Token::Option { key: key @ "smp.ap_timeout_ms", value } => {
                parse_millis(key, value, &mut self.smp_ap_timeout_ms)
            }
            other => debug!("cmdline: ignoring '{}'", other.key()),
        }
    }
}

fn parse_millis(key: &str, value: &str, slot: &mut u64) {
    match value.parse() {
        Ok(ms) => *slot = ms,
        Err(_) => warn!("cmdline: {} expects milliseconds, got '{}'", key, value),
    }
}

impl Default for KernelConfig {
    fn default() -> KernelConfig {
        KernelConfig {
            log_level: Self::DEFAULT_LOG_LEVEL,
            smp: true,
            smp_init_delay_ms: Self::DEFAULT_INIT_DELAY_MS,
            smp_ap_timeout_ms: Self::DEFAULT_AP_TIMEOUT_MS,
        }
    }
}
