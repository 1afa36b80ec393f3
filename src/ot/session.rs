//! Per-role session objects tying connection setup, the base-OT bootstrap
//! and the extension engine together.
//!
//! Initialization inverts the roles once: the network server (session
//! sender) runs the base OTs as primitive sender and then acts as extension
//! receiver for a random OT of `num_second_level_ots` 128-bit messages.
//! The keys it chooses there, together with its choice bits, seed the
//! extension sender used for all bulk transfers; the client ends up with
//! the matching key pairs and becomes the bulk receiver.

use tracing::info;

use crate::bitvec::BitVector;
use crate::config::{OtVariant, Role, SessionConfig};
use crate::conn::{ChannelPool, ConnectionManager};
use crate::ot::baseot::{bootstrap_receiver, bootstrap_sender, BaseOt, DdhBaseOt};
use crate::ot::extension::{ExtensionReceiver, ExtensionSender, SenderInput, SenderOutput};
use crate::ot::mask::{MaskingFunction, XorMasking};
use crate::ot::{OtError, OtResult};
use crate::prg::{Prg, AES_KEY_BYTES};
use crate::seed::{SessionSeeds, INITIAL_SEED};

use ark_ed25519::EdwardsProjective;

/// Lifecycle of a session. Transfers are only legal in `Ready`; a failed
/// network or consistency error is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    ChannelsReady,
    BaseOtDone,
    SecondLevelOtDone,
    Ready,
    Failed,
}

fn require_state(expected: SessionState, found: SessionState) -> OtResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(OtError::State { expected, found })
    }
}

fn is_recoverable(err: &OtError) -> bool {
    matches!(err, OtError::InvalidParameter(_) | OtError::State { .. })
}

fn stage_a_key(seeds: &SessionSeeds) -> [u8; AES_KEY_BYTES] {
    let mut key = [0u8; AES_KEY_BYTES];
    key.copy_from_slice(&seeds.receiver_seed[..AES_KEY_BYTES]);
    key
}

fn split_keystream(raw: &[u8]) -> Vec<[u8; AES_KEY_BYTES]> {
    raw.chunks_exact(AES_KEY_BYTES)
        .map(|chunk| {
            let mut key = [0u8; AES_KEY_BYTES];
            key.copy_from_slice(chunk);
            key
        })
        .collect()
}

/// Sender side of a session: listens for the receiver's channels, then
/// serves bulk transfer calls.
pub struct OtSenderSession {
    cfg: SessionConfig,
    seeds: SessionSeeds,
    pool: Option<ChannelPool>,
    state: SessionState,
    ext: Option<ExtensionSender>,
}

impl OtSenderSession {
    pub fn new(cfg: SessionConfig) -> OtResult<Self> {
        cfg.validate()?;
        if cfg.role != Role::Sender {
            return Err(OtError::InvalidParameter(
                "sender session requires the sender role".into(),
            ));
        }
        let seeds = SessionSeeds::derive(cfg.role, INITIAL_SEED);
        Ok(Self {
            cfg,
            seeds,
            pool: None,
            state: SessionState::Uninitialized,
            ext: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accepts `num_threads + 1` channels from the peer.
    pub fn setup(&mut self) -> OtResult<()> {
        require_state(SessionState::Uninitialized, self.state)?;
        self.guarded(|this| {
            let manager = ConnectionManager::new(
                this.cfg.role,
                this.cfg.address.clone(),
                this.cfg.port,
                this.cfg.num_threads,
            );
            this.pool = Some(manager.setup()?);
            this.state = SessionState::ChannelsReady;
            Ok(())
        })
    }

    /// Runs the base-OT bootstrap on the control channel and the
    /// second-level stage on the first worker channel.
    pub fn initialize(&mut self) -> OtResult<()> {
        require_state(SessionState::ChannelsReady, self.state)?;
        self.guarded(|this| {
            let s2 = this.cfg.num_second_level_ots();
            let num_checks = this.cfg.num_checks;
            let pool = this
                .pool
                .as_mut()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let (control, workers) = pool
                .split_control()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let first_worker = workers
                .first_mut()
                .ok_or_else(|| OtError::InvalidParameter("no worker channels".into()))?;

            let mut base_ot = DdhBaseOt::<EdwardsProjective>::new();
            let first_level = bootstrap_sender(&mut base_ot, this.cfg.num_base_ots, control)?;
            this.state = SessionState::BaseOtDone;
            info!(num_base_ots = this.cfg.num_base_ots, "first-level OTs done");

            // Second stage: choose one random 128-bit key per second-level
            // OT, acting as extension receiver on the first worker channel.
            let mut stage_a = ExtensionReceiver::new(first_level.into_pairs(), num_checks)?;
            let choices =
                BitVector::from_keystream(s2, &mut Prg::new(&stage_a_key(&this.seeds)));
            let raw = stage_a.receive(
                std::slice::from_mut(first_worker),
                &choices,
                s2,
                8 * AES_KEY_BYTES,
                OtVariant::Random,
                &XorMasking,
            )?;
            this.state = SessionState::SecondLevelOtDone;
            info!(num_second_level_ots = s2, "second-level OTs done");

            this.ext = Some(ExtensionSender::new(
                choices,
                split_keystream(&raw),
                num_checks,
                this.seeds.sender_seed,
            )?);
            this.state = SessionState::Ready;
            Ok(())
        })
    }

    /// One bulk transfer call over the worker channels.
    pub fn send(
        &mut self,
        input: SenderInput<'_>,
        num_ots: usize,
        bit_length: usize,
        masking: &dyn MaskingFunction,
    ) -> OtResult<SenderOutput> {
        require_state(SessionState::Ready, self.state)?;
        self.guarded(|this| {
            let pool = this
                .pool
                .as_mut()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let (_, workers) = pool
                .split_control()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let ext = this
                .ext
                .as_mut()
                .ok_or_else(|| OtError::InvalidParameter("extension state missing".into()))?;
            ext.send(workers, input, num_ots, bit_length, masking)
        })
    }

    pub fn close(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.close_all();
        }
        self.ext = None;
        self.state = SessionState::Uninitialized;
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> OtResult<T>) -> OtResult<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                if !is_recoverable(&err) {
                    self.state = SessionState::Failed;
                }
                Err(err)
            }
        }
    }
}

impl Drop for OtSenderSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receiver side of a session: connects to the sender, then issues bulk
/// transfer calls with its choice bits.
pub struct OtReceiverSession {
    cfg: SessionConfig,
    seeds: SessionSeeds,
    pool: Option<ChannelPool>,
    state: SessionState,
    ext: Option<ExtensionReceiver>,
}

impl OtReceiverSession {
    pub fn new(cfg: SessionConfig) -> OtResult<Self> {
        cfg.validate()?;
        if cfg.role != Role::Receiver {
            return Err(OtError::InvalidParameter(
                "receiver session requires the receiver role".into(),
            ));
        }
        let seeds = SessionSeeds::derive(cfg.role, INITIAL_SEED);
        Ok(Self {
            cfg,
            seeds,
            pool: None,
            state: SessionState::Uninitialized,
            ext: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connects `num_threads + 1` channels to the sender.
    pub fn setup(&mut self) -> OtResult<()> {
        require_state(SessionState::Uninitialized, self.state)?;
        self.guarded(|this| {
            let manager = ConnectionManager::new(
                this.cfg.role,
                this.cfg.address.clone(),
                this.cfg.port,
                this.cfg.num_threads,
            );
            this.pool = Some(manager.setup()?);
            this.state = SessionState::ChannelsReady;
            Ok(())
        })
    }

    pub fn initialize(&mut self) -> OtResult<()> {
        require_state(SessionState::ChannelsReady, self.state)?;
        self.guarded(|this| {
            let s2 = this.cfg.num_second_level_ots();
            let num_checks = this.cfg.num_checks;
            let pool = this
                .pool
                .as_mut()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let (control, workers) = pool
                .split_control()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let first_worker = workers
                .first_mut()
                .ok_or_else(|| OtError::InvalidParameter("no worker channels".into()))?;

            let mut base_ot = DdhBaseOt::<EdwardsProjective>::new();
            let mut seed_prg = Prg::new(&stage_a_key(&this.seeds));
            let base_choices = BitVector::from_keystream(this.cfg.num_base_ots, &mut seed_prg);
            let first_level =
                bootstrap_receiver(&mut base_ot, this.cfg.num_base_ots, &base_choices, control)?;
            this.state = SessionState::BaseOtDone;
            info!(num_base_ots = this.cfg.num_base_ots, "first-level OTs done");

            // Second stage: serve the peer's random key choices as
            // extension sender on the first worker channel.
            let mut stage_a = ExtensionSender::new(
                base_choices,
                first_level.into_singles(),
                num_checks,
                this.seeds.sender_seed,
            )?;
            let pairs = stage_a.send(
                std::slice::from_mut(first_worker),
                SenderInput::Random,
                s2,
                8 * AES_KEY_BYTES,
                &XorMasking,
            )?;
            this.state = SessionState::SecondLevelOtDone;
            info!(num_second_level_ots = s2, "second-level OTs done");

            let key_pairs = split_keystream(&pairs.x0)
                .into_iter()
                .zip(split_keystream(&pairs.x1))
                .collect();
            this.ext = Some(ExtensionReceiver::new(key_pairs, num_checks)?);
            this.state = SessionState::Ready;
            Ok(())
        })
    }

    /// One bulk transfer call; returns the `num_ots` chosen messages,
    /// concatenated.
    pub fn receive(
        &mut self,
        choices: &BitVector,
        num_ots: usize,
        bit_length: usize,
        variant: OtVariant,
        masking: &dyn MaskingFunction,
    ) -> OtResult<Vec<u8>> {
        require_state(SessionState::Ready, self.state)?;
        self.guarded(|this| {
            let pool = this
                .pool
                .as_mut()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let (_, workers) = pool
                .split_control()
                .ok_or_else(|| OtError::InvalidParameter("no channels available".into()))?;
            let ext = this
                .ext
                .as_mut()
                .ok_or_else(|| OtError::InvalidParameter("extension state missing".into()))?;
            ext.receive(workers, choices, num_ots, bit_length, variant, masking)
        })
    }

    pub fn close(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.close_all();
        }
        self.ext = None;
        self.state = SessionState::Uninitialized;
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> OtResult<T>) -> OtResult<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                if !is_recoverable(&err) {
                    self.state = SessionState::Failed;
                }
                Err(err)
            }
        }
    }
}

impl Drop for OtReceiverSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs both initialization stages over an arbitrary channel, without the
/// TCP pool. Useful for embedding the engine into an existing transport.
pub fn initialize_sender_over<B, C>(
    base_ot: &mut B,
    channel: &mut C,
    cfg: &SessionConfig,
    seeds: &SessionSeeds,
) -> OtResult<ExtensionSender>
where
    B: BaseOt,
    C: crate::channel::AbstractChannel,
{
    let s2 = cfg.num_second_level_ots();
    let first_level = bootstrap_sender(base_ot, cfg.num_base_ots, channel)?;
    let mut stage_a = ExtensionReceiver::new(first_level.into_pairs(), cfg.num_checks)?;
    let choices = BitVector::from_keystream(s2, &mut Prg::new(&stage_a_key(seeds)));
    let raw = stage_a.receive(
        std::slice::from_mut(channel),
        &choices,
        s2,
        8 * AES_KEY_BYTES,
        OtVariant::Random,
        &XorMasking,
    )?;
    ExtensionSender::new(
        choices,
        split_keystream(&raw),
        cfg.num_checks,
        seeds.sender_seed,
    )
}

/// Receiver-side counterpart of [`initialize_sender_over`].
pub fn initialize_receiver_over<B, C>(
    base_ot: &mut B,
    channel: &mut C,
    cfg: &SessionConfig,
    seeds: &SessionSeeds,
) -> OtResult<ExtensionReceiver>
where
    B: BaseOt,
    C: crate::channel::AbstractChannel,
{
    let s2 = cfg.num_second_level_ots();
    let mut seed_prg = Prg::new(&stage_a_key(seeds));
    let base_choices = BitVector::from_keystream(cfg.num_base_ots, &mut seed_prg);
    let first_level = bootstrap_receiver(base_ot, cfg.num_base_ots, &base_choices, channel)?;
    let mut stage_a = ExtensionSender::new(
        base_choices,
        first_level.into_singles(),
        cfg.num_checks,
        seeds.sender_seed,
    )?;
    let pairs = stage_a.send(
        std::slice::from_mut(channel),
        SenderInput::Random,
        s2,
        8 * AES_KEY_BYTES,
        &XorMasking,
    )?;
    let key_pairs = split_keystream(&pairs.x0)
        .into_iter()
        .zip(split_keystream(&pairs.x1))
        .collect();
    ExtensionReceiver::new(key_pairs, cfg.num_checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::unix_pair;
    use std::thread;

    #[test]
    fn session_rejects_mismatched_role() {
        let cfg = SessionConfig::new(Role::Receiver, "127.0.0.1", 7766);
        assert!(matches!(
            OtSenderSession::new(cfg),
            Err(OtError::InvalidParameter(_))
        ));
        let cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        assert!(matches!(
            OtReceiverSession::new(cfg),
            Err(OtError::InvalidParameter(_))
        ));
    }

    #[test]
    fn transfer_before_setup_is_a_state_error() {
        let cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        let mut session = OtSenderSession::new(cfg).unwrap();
        let x = vec![0u8; 700 * 16];
        let result = session.send(
            SenderInput::General { x0: &x, x1: &x },
            700,
            128,
            &XorMasking,
        );
        assert!(matches!(
            result,
            Err(OtError::State {
                expected: SessionState::Ready,
                found: SessionState::Uninitialized,
            })
        ));
        // A misuse error must not poison the session.
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn initialization_stages_produce_matching_engines() {
        let mut cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7766);
        cfg.num_base_ots = 16;
        cfg.num_checks = 32;
        let sender_seeds = SessionSeeds::derive(Role::Sender, INITIAL_SEED);
        let receiver_seeds = SessionSeeds::derive(Role::Receiver, INITIAL_SEED);

        let (mut server_chan, mut client_chan) = unix_pair();
        let server_cfg = cfg.clone();
        let server = thread::spawn(move || {
            let mut base_ot = DdhBaseOt::<EdwardsProjective>::new();
            initialize_sender_over(&mut base_ot, &mut server_chan, &server_cfg, &sender_seeds)
                .map(|mut ext| {
                    let x0 = vec![0x5au8; 40 * 8];
                    let x1 = vec![0xa5u8; 40 * 8];
                    ext.send(
                        std::slice::from_mut(&mut server_chan),
                        SenderInput::General { x0: &x0, x1: &x1 },
                        40,
                        64,
                        &XorMasking,
                    )
                })
                .and_then(|r| r)
        });

        let mut base_ot = DdhBaseOt::<EdwardsProjective>::new();
        let mut ext =
            initialize_receiver_over(&mut base_ot, &mut client_chan, &cfg, &receiver_seeds)
                .unwrap();
        let choices = BitVector::from_keystream(40, &mut Prg::new(&[7u8; 16]));
        let got = ext
            .receive(
                std::slice::from_mut(&mut client_chan),
                &choices,
                40,
                64,
                OtVariant::General,
                &XorMasking,
            )
            .unwrap();
        server.join().unwrap().unwrap();

        for j in 0..40 {
            let want = if choices.get_bit(j) { 0xa5 } else { 0x5a };
            assert!(got[j * 8..][..8].iter().all(|&b| b == want), "ot {j}");
        }
    }
}
