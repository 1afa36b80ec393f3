//! End-to-end session tests over loopback TCP.

use std::thread;

use maliciousot::{
    BitVector, OtReceiverSession, OtSenderSession, OtVariant, Role, SenderInput, SessionConfig,
    SessionState, XorMasking,
};
use maliciousot::conn::DEFAULT_PORT;
use maliciousot::prg::Prg;

fn run_pair<S, R, T, U>(sender_cfg: SessionConfig, receiver_cfg: SessionConfig, s: S, r: R) -> (T, U)
where
    S: FnOnce(&mut OtSenderSession) -> T + Send + 'static,
    R: FnOnce(&mut OtReceiverSession) -> U,
    T: Send + 'static,
{
    let server = thread::spawn(move || {
        let mut session = OtSenderSession::new(sender_cfg).unwrap();
        session.setup().unwrap();
        session.initialize().unwrap();
        let out = s(&mut session);
        session.close();
        out
    });

    let mut session = OtReceiverSession::new(receiver_cfg).unwrap();
    session.setup().unwrap();
    session.initialize().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    let out = r(&mut session);
    session.close();
    (server.join().unwrap(), out)
}

#[test]
fn default_scenario_delivers_chosen_messages() {
    let sender_cfg = SessionConfig::new(Role::Sender, "127.0.0.1", DEFAULT_PORT);
    let receiver_cfg = SessionConfig::new(Role::Receiver, "127.0.0.1", DEFAULT_PORT);
    let (num_ots, lbytes) = (sender_cfg.num_ots, sender_cfg.bit_length / 8);

    let x0: Vec<u8> = (0..num_ots * lbytes).map(|i| i as u8).collect();
    let x1: Vec<u8> = (0..num_ots * lbytes).map(|i| (i as u8) ^ 0xff).collect();
    let choices = BitVector::from_keystream(num_ots, &mut Prg::new(&[42u8; 16]));

    let (sent, got) = {
        let (x0, x1) = (x0.clone(), x1.clone());
        let choices_r = BitVector::from_bytes(choices.as_bytes().to_vec(), num_ots);
        run_pair(
            sender_cfg,
            receiver_cfg,
            move |session| {
                session
                    .send(
                        SenderInput::General { x0: &x0, x1: &x1 },
                        num_ots,
                        lbytes * 8,
                        &XorMasking,
                    )
                    .unwrap()
            },
            move |session| {
                session
                    .receive(&choices_r, num_ots, lbytes * 8, OtVariant::General, &XorMasking)
                    .unwrap()
            },
        )
    };

    assert_eq!(sent.x0, x0);
    assert_eq!(sent.x1, x1);
    for j in 0..num_ots {
        let want = if choices.get_bit(j) {
            &x1[j * lbytes..][..lbytes]
        } else {
            &x0[j * lbytes..][..lbytes]
        };
        assert_eq!(&got[j * lbytes..][..lbytes], want, "ot {j}");
    }
}

#[test]
fn session_serves_consecutive_variant_calls() {
    let mut sender_cfg = SessionConfig::new(Role::Sender, "127.0.0.1", 7767);
    sender_cfg.num_threads = 2;
    sender_cfg.num_base_ots = 16;
    sender_cfg.num_checks = 32;
    let mut receiver_cfg = sender_cfg.clone();
    receiver_cfg.role = Role::Receiver;

    let (num_ots, lbytes) = (300, 16);
    let delta = vec![0x77u8; lbytes];
    let choices = BitVector::from_keystream(num_ots, &mut Prg::new(&[13u8; 16]));

    let (sent, gots) = {
        let delta_s = delta.clone();
        let choices_r = BitVector::from_bytes(choices.as_bytes().to_vec(), num_ots);
        run_pair(
            sender_cfg,
            receiver_cfg,
            move |session| {
                let correlated = session
                    .send(
                        SenderInput::Correlated { delta: &delta_s },
                        num_ots,
                        lbytes * 8,
                        &XorMasking,
                    )
                    .unwrap();
                let random = session
                    .send(SenderInput::Random, num_ots, lbytes * 8, &XorMasking)
                    .unwrap();
                (correlated, random)
            },
            move |session| {
                let correlated = session
                    .receive(
                        &choices_r,
                        num_ots,
                        lbytes * 8,
                        OtVariant::Correlated,
                        &XorMasking,
                    )
                    .unwrap();
                let random = session
                    .receive(
                        &choices_r,
                        num_ots,
                        lbytes * 8,
                        OtVariant::Random,
                        &XorMasking,
                    )
                    .unwrap();
                (correlated, random)
            },
        )
    };

    let (correlated_sent, random_sent) = sent;
    let (correlated_got, random_got) = gots;

    for j in 0..num_ots {
        let x0 = &correlated_sent.x0[j * lbytes..][..lbytes];
        let x1 = &correlated_sent.x1[j * lbytes..][..lbytes];
        let diff: Vec<u8> = x0.iter().zip(x1).map(|(a, b)| a ^ b).collect();
        assert_eq!(diff, delta, "ot {j}");
        let want = if choices.get_bit(j) { x1 } else { x0 };
        assert_eq!(&correlated_got[j * lbytes..][..lbytes], want, "ot {j}");

        let want = if choices.get_bit(j) {
            &random_sent.x1[j * lbytes..][..lbytes]
        } else {
            &random_sent.x0[j * lbytes..][..lbytes]
        };
        assert_eq!(&random_got[j * lbytes..][..lbytes], want, "ot {j}");
    }
}
