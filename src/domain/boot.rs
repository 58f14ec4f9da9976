//! Boot lifecycle data model: `spec.md` §3's `BootStats` and §4.I's
//! `RegistrationStatus`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RegistrationStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Accepted" => RegistrationStatus::Accepted,
            "Rejected" => RegistrationStatus::Rejected,
            _ => RegistrationStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "Pending",
            RegistrationStatus::Accepted => "Accepted",
            RegistrationStatus::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootStats {
    pub boot_nr: u16,
    pub last_boot_success: u16,
    pub software_version: String,
}

impl BootStats {
    pub fn first_boot(software_version: impl Into<String>) -> Self {
        Self {
            boot_nr: 1,
            last_boot_success: 0,
            software_version: software_version.into(),
        }
    }

    pub fn next_boot(&self) -> Self {
        Self {
            boot_nr: self.boot_nr.wrapping_add(1),
            last_boot_success: self.last_boot_success,
            software_version: self.software_version.clone(),
        }
    }

    pub fn record_success(&mut self) {
        self.last_boot_success = self.boot_nr;
    }

    pub fn survived_previous_boot(&self) -> bool {
        self.last_boot_success + 1 == self.boot_nr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_boot_starts_at_one() {
        let stats = BootStats::first_boot("1.0.0");
        assert_eq!(stats.boot_nr, 1);
        assert_eq!(stats.last_boot_success, 0);
    }

    #[test]
    fn record_success_advances_last_boot_success() {
        let mut stats = BootStats::first_boot("1.0.0");
        stats.record_success();
        assert_eq!(stats.last_boot_success, 1);
        let stats = stats.next_boot();
        assert!(stats.survived_previous_boot());
    }
}
