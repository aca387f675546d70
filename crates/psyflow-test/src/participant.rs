//! Simulated participant
//!
//! A [`Surface`] that answers every displayed screen with a key press or a
//! click after a sampled response time:
//! - Fixed, uniform or ex-Gaussian response times
//! - A fixed key, a random key from a set, or a click
//! - Key releases after a configurable hold time

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use psyflow_input::{InputEvent, KeyCode};
use psyflow_timeline::{now, Surface};

/// Response time distribution
#[derive(Clone, Debug)]
pub enum RtDistribution {
    Fixed(Duration),
    Uniform { min_ms: u32, max_ms: u32 },
    /// Normal component plus an exponential tail, the usual shape of human
    /// response times
    ExGaussian { mu_ms: f64, sigma_ms: f64, tau_ms: f64 },
}

impl RtDistribution {
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            RtDistribution::Fixed(rt) => *rt,
            RtDistribution::Uniform { min_ms, max_ms } => {
                if min_ms >= max_ms {
                    return Duration::from_millis(*min_ms as u64);
                }
                let dist = Uniform::new(*min_ms, *max_ms);
                Duration::from_millis(dist.sample(rng) as u64)
            }
            RtDistribution::ExGaussian {
                mu_ms,
                sigma_ms,
                tau_ms,
            } => {
                // Box-Muller for the normal part
                let u1: f64 = rng.gen();
                let u2: f64 = rng.gen();
                let z = (-2.0 * (1.0 - u1).ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let u3: f64 = rng.gen();
                let tail = -tau_ms * (1.0 - u3).ln();
                let ms = (mu_ms + sigma_ms * z + tail).max(1.0);
                Duration::from_micros((ms * 1000.0) as u64)
            }
        }
    }
}

/// What the participant does once the response time has passed
#[derive(Clone, Debug)]
pub enum Answer {
    Key(KeyCode),
    /// A key drawn at random for every screen
    AnyOf(Vec<KeyCode>),
    Click { x: f64, y: f64 },
}

/// Simulated participant configuration
#[derive(Clone, Debug)]
pub struct ParticipantConfig {
    pub rt: RtDistribution,
    pub answer: Answer,
    /// Time between key down and key up
    pub hold: Duration,
    pub seed: u64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        ParticipantConfig {
            rt: RtDistribution::Uniform {
                min_ms: 300,
                max_ms: 800,
            },
            answer: Answer::Key(KeyCode(32)),
            hold: Duration::from_millis(80),
            seed: 0,
        }
    }
}

impl ParticipantConfig {
    /// Same key after the same time on every screen
    pub fn fixed(rt: Duration, key: impl Into<KeyCode>) -> Self {
        ParticipantConfig {
            rt: RtDistribution::Fixed(rt),
            answer: Answer::Key(key.into()),
            ..ParticipantConfig::default()
        }
    }

    pub fn with_answer(mut self, answer: Answer) -> Self {
        self.answer = answer;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Everything that was displayed, shared between clones
#[derive(Clone, Debug, Default)]
pub struct ScreenLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ScreenLog {
    pub fn shown(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.shown().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, content: &str) {
        self.entries.lock().push(content.to_string());
    }
}

enum Action {
    Press(KeyCode),
    Click(f64, f64),
}

/// Surface that answers every screen through the session's input channel
pub struct SimulatedParticipant {
    config: ParticipantConfig,
    rng: StdRng,
    tx: UnboundedSender<InputEvent>,
    log: ScreenLog,
    /// Bumped by every `show`; answers to earlier screens are dropped
    generation: Arc<AtomicU64>,
}

impl SimulatedParticipant {
    pub fn new(config: ParticipantConfig, tx: UnboundedSender<InputEvent>) -> Self {
        SimulatedParticipant {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            tx,
            log: ScreenLog::default(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn screen_log(&self) -> ScreenLog {
        self.log.clone()
    }

    fn respond(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.config.rt.sample(&mut self.rng);
        let action = match &self.config.answer {
            Answer::Key(code) => Action::Press(*code),
            Answer::AnyOf(keys) if keys.is_empty() => return,
            Answer::AnyOf(keys) => Action::Press(keys[self.rng.gen_range(0..keys.len())]),
            Answer::Click { x, y } => Action::Click(*x, *y),
        };

        let tx = self.tx.clone();
        let current = self.generation.clone();
        let hold = self.config.hold;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) != generation {
                trace!(generation, "screen replaced before answering");
                return;
            }
            match action {
                Action::Press(code) => {
                    let _ = tx.send(InputEvent::key_down(code, now()));
                    tokio::time::sleep(hold).await;
                    let _ = tx.send(InputEvent::key_up(code, now()));
                }
                Action::Click(x, y) => {
                    let _ = tx.send(InputEvent::click(x, y, now()));
                }
            }
        });
    }
}

impl Surface for SimulatedParticipant {
    fn show(&mut self, content: &str) {
        self.log.push(content);
        self.respond();
    }

    fn clear(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_rt_distributions_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let uniform = RtDistribution::Uniform {
            min_ms: 200,
            max_ms: 400,
        };
        let ex_gaussian = RtDistribution::ExGaussian {
            mu_ms: 400.0,
            sigma_ms: 50.0,
            tau_ms: 100.0,
        };
        for _ in 0..1000 {
            let rt = uniform.sample(&mut rng);
            assert!(rt >= Duration::from_millis(200) && rt < Duration::from_millis(400));
            assert!(ex_gaussian.sample(&mut rng) >= Duration::from_millis(1));
        }
        assert_eq!(
            RtDistribution::Uniform {
                min_ms: 5,
                max_ms: 5
            }
            .sample(&mut rng),
            Duration::from_millis(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_after_response_time() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut participant = SimulatedParticipant::new(
            ParticipantConfig::fixed(Duration::from_millis(300), 74u32),
            tx,
        );
        let start = now();
        participant.show("screen");

        let down = rx.recv().await.unwrap();
        assert!(matches!(down, InputEvent::KeyDown { code: KeyCode(74), .. }));
        assert!(down.at() - start >= Duration::from_millis(300));
        let up = rx.recv().await.unwrap();
        assert!(matches!(up, InputEvent::KeyUp { code: KeyCode(74), .. }));
        assert_eq!(participant.screen_log().shown(), vec!["screen".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_screen_cancels_pending_answer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = ParticipantConfig::fixed(Duration::from_millis(300), 74u32)
            .with_answer(Answer::Click { x: 1.0, y: 2.0 });
        let mut participant = SimulatedParticipant::new(config, tx);
        let start = now();

        participant.show("first");
        tokio::time::sleep(Duration::from_millis(100)).await;
        participant.show("second");

        let click = rx.recv().await.unwrap();
        assert!(click.at() - start >= Duration::from_millis(400));
        assert!(matches!(click, InputEvent::Click { .. }));
        drop(participant);
        assert!(rx.recv().await.is_none());
    }
}
