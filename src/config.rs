//! Session parameters, fixed at construction time.

use std::str::FromStr;

use crate::ot::{OtError, OtResult, BLOCK_SIZE, DEFAULT_NUM_CHECKS};

/// The party's protocol role. The sender is the network listener, the
/// receiver connects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Role::Sender => 0,
            Role::Receiver => 1,
        }
    }
}

/// Which flavor of 1-out-of-2 OT a transfer call runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtVariant {
    /// Sender supplies both messages explicitly.
    General,
    /// Sender supplies a correlation; the second message is the first
    /// xored with it.
    Correlated,
    /// Both messages are derived from the key material and returned to the
    /// sender as output.
    Random,
}

impl FromStr for OtVariant {
    type Err = OtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(OtVariant::General),
            "correlated" => Ok(OtVariant::Correlated),
            "random" => Ok(OtVariant::Random),
            other => Err(OtError::InvalidParameter(format!(
                "unknown OT variant {other:?}"
            ))),
        }
    }
}

/// Immutable configuration of one OT session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub role: Role,
    /// Peer (receiver role) or bind (sender role) address.
    pub address: String,
    pub port: u16,
    /// Worker threads; the channel pool holds `num_threads + 1` channels.
    pub num_threads: usize,
    /// First-level base OTs run by the bootstrap.
    pub num_base_ots: usize,
    /// Extension OTs per bulk transfer call, used for sizing.
    pub num_ots: usize,
    /// Default transfer variant for callers that drive the session from
    /// external configuration.
    pub variant: OtVariant,
    /// Bits per transferred element; must be a multiple of 8.
    pub bit_length: usize,
    /// Consistency checks per transfer slice. Explicit configuration, not a
    /// hardcoded constant.
    pub num_checks: usize,
}

impl SessionConfig {
    /// Configuration with the customary defaults: one worker thread, 190
    /// base OTs, 700 extension OTs of 128 bits, general variant, 380
    /// checks.
    pub fn new(role: Role, address: impl Into<String>, port: u16) -> Self {
        Self {
            role,
            address: address.into(),
            port,
            num_threads: 1,
            num_base_ots: 190,
            num_ots: 700,
            variant: OtVariant::General,
            bit_length: 128,
            num_checks: DEFAULT_NUM_CHECKS,
        }
    }

    /// Number of second-level base OTs derived during initialization:
    /// `nblocks * num_base_ots` with
    /// `nblocks = ceil(num_ots / (BLOCK_SIZE * 2^ceil(log2(num_base_ots))))`.
    pub fn num_second_level_ots(&self) -> usize {
        self.num_blocks() * self.num_base_ots
    }

    fn num_blocks(&self) -> usize {
        let wdsize = self.num_base_ots.next_power_of_two();
        self.num_ots.div_ceil(BLOCK_SIZE * wdsize)
    }

    pub(crate) fn validate(&self) -> OtResult<()> {
        if self.num_threads == 0 {
            return Err(OtError::InvalidParameter(
                "at least one worker thread is required".into(),
            ));
        }
        if self.num_base_ots < 2 {
            return Err(OtError::InvalidParameter(
                "num_base_ots must be at least 2".into(),
            ));
        }
        if self.num_ots == 0 {
            return Err(OtError::InvalidParameter("num_ots must be positive".into()));
        }
        if self.bit_length == 0 || self.bit_length % 8 != 0 {
            return Err(OtError::InvalidParameter(format!(
                "bit_length {} is not a positive multiple of 8",
                self.bit_length
            )));
        }
        if self.num_checks == 0 {
            return Err(OtError::InvalidParameter(
                "num_checks must be positive".into(),
            ));
        }
        if self.num_blocks() > BLOCK_SIZE {
            return Err(OtError::InvalidParameter(format!(
                "num_ots {} exceeds the supported block budget",
                self.num_ots
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizing_matches_reference_parameters() {
        // 190 base OTs, 700 OTs: wdsize = 256, one block, s2 = 190.
        let cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        assert_eq!(cfg.num_second_level_ots(), 190);
    }

    #[test]
    fn variant_parses_from_config_surface() {
        assert_eq!("general".parse::<OtVariant>().unwrap(), OtVariant::General);
        assert_eq!(
            "correlated".parse::<OtVariant>().unwrap(),
            OtVariant::Correlated
        );
        assert_eq!("random".parse::<OtVariant>().unwrap(), OtVariant::Random);
        assert!("garbled".parse::<OtVariant>().is_err());
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let mut cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        cfg.bit_length = 12;
        assert!(cfg.validate().is_err());

        let mut cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        cfg.num_threads = 0;
        assert!(cfg.validate().is_err());

        let cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        assert!(cfg.validate().is_ok());
    }
}
