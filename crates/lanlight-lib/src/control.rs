//! Control loop and supervisor.
//!
//! All input threads feed one channel of [`ControlMsg`]s. The session loop
//! consumes it and owns every light, so operations never overlap. The
//! supervisor discovers and connects the group, runs the session loop, and
//! rebuilds the group whenever a session ends on a fatal error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::action::{self, Keymap};
use crate::cloud::CloudClient;
use crate::device::{Dialer, LightConnection, LightError, Result};
use crate::discovery::{DiscoveryManager, DiscoverySource};
use crate::input::Activate;
use crate::reconnect::{ReconnectConfig, ReconnectState};
use crate::session::{Session, SessionConfig};

/// Longest the loop blocks before rechecking the running flag.
const POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    Activate(Activate),
    /// Periodic liveness probe.
    KeepAlive,
    Shutdown,
}

impl From<Activate> for ControlMsg {
    fn from(a: Activate) -> Self {
        ControlMsg::Activate(a)
    }
}

/// Send [`ControlMsg::KeepAlive`] every `interval` until the receiver hangs up.
pub fn spawn_keepalive(
    interval: Duration,
    tx: Sender<ControlMsg>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("keepalive".into())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                if tx.send(ControlMsg::KeepAlive).is_err() {
                    return;
                }
            }
        })
}

/// Probe every light's power. Errors only when a light is gone for good.
fn keepalive<C: LightConnection>(lights: &mut [Session<C>]) -> Result<()> {
    for light in lights.iter_mut() {
        match light.get_power(light.deadline()) {
            Ok(power) => log::debug!("[keepalive] {} is {power}", light.handle()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::warn!("[keepalive] {}: {e}", light.handle()),
        }
    }
    Ok(())
}

/// Consume messages until shutdown, applying each activation to `lights`.
///
/// Returns `Ok(())` on shutdown (message, cleared `running` flag, or every
/// sender gone) and the error when a light fails fatally. Other errors are
/// logged and the loop carries on.
pub fn run_session<C: LightConnection>(
    lights: &mut [Session<C>],
    keymap: &Keymap,
    rx: &Receiver<ControlMsg>,
    running: &AtomicBool,
) -> Result<()> {
    while running.load(Ordering::SeqCst) {
        let msg = match rx.recv_timeout(POLL) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("all inputs closed");
                return Ok(());
            }
        };
        let result = match msg {
            ControlMsg::Activate(activate) => action::route(keymap, lights, activate).map(|_| ()),
            ControlMsg::KeepAlive => keepalive(lights),
            ControlMsg::Shutdown => return Ok(()),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::warn!("{e}"),
        }
    }
    Ok(())
}

/// Keeps a light group alive across discovery failures and lost lights.
pub struct Supervisor<S, D> {
    discovery: DiscoveryManager<S>,
    dialer: D,
    session: SessionConfig,
    keymap: Keymap,
    target_count: usize,
    attempts: u32,
    rebuild: ReconnectConfig,
    cloud: Option<CloudClient>,
}

impl<S, D> Supervisor<S, D>
where
    S: DiscoverySource + Sync,
    D: Dialer,
{
    pub fn new(
        discovery: DiscoveryManager<S>,
        dialer: D,
        session: SessionConfig,
        keymap: Keymap,
    ) -> Self {
        Self {
            discovery,
            dialer,
            session,
            keymap,
            target_count: 1,
            attempts: 5,
            rebuild: ReconnectConfig::default(),
            cloud: None,
        }
    }

    pub fn target_count(mut self, count: usize) -> Self {
        self.target_count = count;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn rebuild(mut self, config: ReconnectConfig) -> Self {
        self.rebuild = config;
        self
    }

    /// Cloud client used while no light is connected.
    pub fn cloud(mut self, cloud: Option<CloudClient>) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn discovery(&self) -> &DiscoveryManager<S> {
        &self.discovery
    }

    /// Discover and connect the group. Lights that refuse the connection
    /// are skipped; the group needs at least one.
    pub fn build_lights(&self) -> Result<Vec<Session<D::Connection>>> {
        let handles = self.discovery.discover(self.target_count, self.attempts)?;
        let mut lights = Vec::with_capacity(handles.len());
        for handle in &handles {
            match Session::connect(handle, &self.dialer, self.session.clone()) {
                Ok(session) => lights.push(session),
                Err(e) => log::warn!("skipping {handle}: {e}"),
            }
        }
        if lights.is_empty() {
            return Err(LightError::DialFailed(format!(
                "none of {} discovered lights accepted a connection",
                handles.len()
            )));
        }
        Ok(lights)
    }

    /// Build the group and run sessions until shutdown.
    pub fn run(&self, rx: &Receiver<ControlMsg>, running: &AtomicBool) -> Result<()> {
        let mut pacing = ReconnectState::new(self.rebuild.clone());
        while running.load(Ordering::SeqCst) {
            if !pacing.should_attempt() {
                if !self.idle(rx, running, pacing.remaining()) {
                    break;
                }
                continue;
            }

            let mut lights = match self.build_lights() {
                Ok(lights) => lights,
                Err(e) => {
                    pacing.record_failure();
                    log::warn!(
                        "{e} (attempt {}, retry in {:.0}s)",
                        pacing.consecutive_failures(),
                        pacing.current_delay().as_secs_f64()
                    );
                    // only presses made while idle may reach the cloud
                    if !drain(rx) {
                        break;
                    }
                    continue;
                }
            };
            pacing.record_success();
            log::info!("controlling {} light(s)", lights.len());

            // presses made while the group was down are stale by now
            if !drain(rx) {
                break;
            }
            match run_session(&mut lights, &self.keymap, rx, running) {
                Ok(()) => break,
                Err(e) => log::warn!("session lost: {e}; rebuilding"),
            }
        }
        Ok(())
    }

    /// Wait up to `wait` with no lights, serving presses through the cloud.
    /// Returns `false` on shutdown.
    fn idle(&self, rx: &Receiver<ControlMsg>, running: &AtomicBool, wait: Duration) -> bool {
        let until = Instant::now() + wait;
        while running.load(Ordering::SeqCst) {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            match rx.recv_timeout(left.min(POLL)) {
                Ok(ControlMsg::Activate(activate)) => self.fallback(activate),
                Ok(ControlMsg::KeepAlive) | Err(RecvTimeoutError::Timeout) => {}
                Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        false
    }

    fn fallback(&self, activate: Activate) {
        if activate.is_repeat {
            return;
        }
        let Some(action) = self.keymap.get(activate.code) else {
            return;
        };
        match &self.cloud {
            Some(cloud) => match cloud.apply(action) {
                Ok(true) => {}
                Ok(false) => log::info!("no light connected, {action} needs one"),
                Err(e) => log::warn!("[cloud] {action}: {e}"),
            },
            None => log::info!("no light connected, ignoring {action}"),
        }
    }
}

/// Discard queued messages. Returns `false` if shutdown was among them.
fn drain(rx: &Receiver<ControlMsg>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(ControlMsg::Shutdown) => return false,
            Ok(_) => {}
            Err(std::sync::mpsc::TryRecvError::Empty) => return true,
            Err(std::sync::mpsc::TryRecvError::Disconnected) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Call, MockDialer, MockLight, handle};
    use crate::device::Power;
    use crate::discovery::mock::ScriptedSource;
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::mpsc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn press(code: u16) -> ControlMsg {
        ControlMsg::Activate(Activate {
            code,
            is_repeat: false,
        })
    }

    fn repeat(code: u16) -> ControlMsg {
        ControlMsg::Activate(Activate {
            code,
            is_repeat: true,
        })
    }

    fn fast_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.initial_deadline = ms(1);
        config.backoff.max_deadline = ms(4);
        config.backoff.retry_delay = ms(1);
        config
    }

    fn lights(n: u8) -> Vec<Session<MockLight>> {
        (1..=n)
            .map(|i| Session::new(MockLight::new(handle(i)), fast_config()))
            .collect()
    }

    // ── Session loop ──

    #[test]
    fn activations_are_applied_in_order() {
        let mut group = lights(1);
        let (tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);
        let before = group[0].connection().color.brightness;

        tx.send(press(115)).unwrap();
        tx.send(repeat(115)).unwrap();
        tx.send(repeat(115)).unwrap();
        tx.send(ControlMsg::Shutdown).unwrap();
        run_session(&mut group, &Keymap::default(), &rx, &running).unwrap();

        let light = group[0].connection();
        assert_eq!(light.color.brightness, before + 3 * 2185);
        // only the press reads the light; repeats use the cache
        assert_eq!(light.count(|c| *c == Call::GetColor), 1);
    }

    #[test]
    fn shutdown_via_running_flag() {
        let mut group = lights(1);
        let (_tx, rx) = mpsc::channel::<ControlMsg>();
        let running = AtomicBool::new(false);
        run_session(&mut group, &Keymap::default(), &rx, &running).unwrap();
        assert!(group[0].connection().calls.is_empty());
    }

    #[test]
    fn closed_channel_ends_session() {
        let mut group = lights(1);
        let (tx, rx) = mpsc::channel();
        tx.send(press(1)).unwrap();
        drop(tx);
        let running = AtomicBool::new(true);
        run_session(&mut group, &Keymap::default(), &rx, &running).unwrap();
        assert_eq!(group[0].connection().power, Power::Off);
    }

    #[test]
    fn fatal_error_ends_session() {
        let mut group = lights(1);
        group[0].connection_mut().fail_next(100);
        let (tx, rx) = mpsc::channel();
        tx.send(press(1)).unwrap();
        tx.send(press(115)).unwrap();
        let running = AtomicBool::new(true);
        let err = run_session(&mut group, &Keymap::default(), &rx, &running).unwrap_err();
        assert!(matches!(err, LightError::DeadlineExceeded { .. }));
    }

    #[test]
    fn non_fatal_error_is_logged_and_skipped() {
        let mut group = lights(1);
        group[0]
            .connection_mut()
            .failures
            .push_back(LightError::Protocol("garbled".into()));
        let (tx, rx) = mpsc::channel();
        tx.send(press(1)).unwrap(); // fails with the protocol error
        tx.send(press(6)).unwrap(); // preset 4300K at full brightness
        tx.send(ControlMsg::Shutdown).unwrap();
        let running = AtomicBool::new(true);
        run_session(&mut group, &Keymap::default(), &rx, &running).unwrap();
        assert_eq!(group[0].connection().color.kelvin, 4300);
    }

    #[test]
    fn keepalive_probes_every_light() {
        let mut group = lights(2);
        let (tx, rx) = mpsc::channel();
        tx.send(ControlMsg::KeepAlive).unwrap();
        tx.send(ControlMsg::Shutdown).unwrap();
        let running = AtomicBool::new(true);
        run_session(&mut group, &Keymap::default(), &rx, &running).unwrap();
        for light in &group {
            assert_eq!(light.connection().calls, vec![Call::GetPower]);
        }
    }

    #[test]
    fn keepalive_thread_stops_when_receiver_drops() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn_keepalive(ms(5), tx).unwrap();
        assert_eq!(rx.recv_timeout(ms(500)).unwrap(), ControlMsg::KeepAlive);
        drop(rx);
        handle.join().unwrap();
    }

    // ── Supervisor ──

    fn supervisor(
        script: Vec<Vec<(Duration, crate::device::DeviceHandle)>>,
        dialer: MockDialer,
    ) -> Supervisor<ScriptedSource, MockDialer> {
        Supervisor::new(
            DiscoveryManager::new(ScriptedSource::new(script), ms(50)),
            dialer,
            fast_config(),
            Keymap::default(),
        )
        .attempts(1)
        .rebuild(ReconnectConfig {
            initial_delay: ms(20),
            max_delay: ms(40),
            multiplier: 2.0,
        })
    }

    #[test]
    fn build_lights_connects_every_discovered_light() {
        let sup = supervisor(
            vec![vec![(ms(1), handle(1)), (ms(2), handle(2))]],
            MockDialer::default(),
        )
        .target_count(2);
        let group = sup.build_lights().unwrap();
        let handles: Vec<_> = group.iter().map(|s| s.handle().clone()).collect();
        assert_eq!(handles, vec![handle(1), handle(2)]);
    }

    #[test]
    fn build_lights_skips_refused_lights() {
        let dialer = MockDialer {
            refuse: vec![handle(1).addr],
        };
        let sup = supervisor(vec![vec![(ms(1), handle(1)), (ms(2), handle(2))]], dialer)
            .target_count(2);
        let group = sup.build_lights().unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(*group[0].handle(), handle(2));
    }

    #[test]
    fn build_lights_fails_when_all_refuse() {
        let dialer = MockDialer {
            refuse: vec![handle(1).addr],
        };
        let sup = supervisor(vec![vec![(ms(1), handle(1))]], dialer);
        let err = sup.build_lights().unwrap_err();
        assert!(matches!(err, LightError::DialFailed(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn build_lights_reports_not_found() {
        let sup = supervisor(vec![], MockDialer::default());
        assert!(matches!(
            sup.build_lights().unwrap_err(),
            LightError::NotFound { attempts: 1 }
        ));
    }

    #[test]
    fn run_retries_failed_build_then_stops_on_shutdown() {
        // first scan finds nothing, second finds a light
        let sup = supervisor(vec![vec![], vec![(ms(1), handle(4))]], MockDialer::default());
        let (tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);
        let sender = std::thread::spawn(move || {
            std::thread::sleep(ms(400));
            tx.send(ControlMsg::Shutdown).unwrap();
        });
        sup.run(&rx, &running).unwrap();
        sender.join().unwrap();
        assert_eq!(sup.discovery().source().windows(), vec![ms(50), ms(50)]);
    }

    #[test]
    fn presses_queued_during_failed_build_never_reach_cloud() {
        let endpoint = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        endpoint.set_nonblocking(true).unwrap();
        let url = format!("http://{}/v1/lights/all/state", endpoint.local_addr().unwrap());
        let cloud = CloudClient::new(&url, "token").unwrap();
        let sup = supervisor(vec![], MockDialer::default()).cloud(Some(cloud));

        let (tx, rx) = mpsc::channel();
        tx.send(press(2)).unwrap();
        let running = AtomicBool::new(true);
        let sender = std::thread::spawn(move || {
            std::thread::sleep(ms(200));
            tx.send(ControlMsg::Shutdown).unwrap();
        });
        sup.run(&rx, &running).unwrap();
        sender.join().unwrap();

        let err = endpoint.accept().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn run_returns_immediately_when_not_running() {
        let sup = supervisor(vec![vec![(ms(1), handle(1))]], MockDialer::default());
        let (_tx, rx) = mpsc::channel();
        let running = AtomicBool::new(false);
        sup.run(&rx, &running).unwrap();
        assert!(sup.discovery().source().windows().is_empty());
    }

    #[test]
    fn idle_stops_on_shutdown_message() {
        let sup = supervisor(vec![], MockDialer::default());
        let (tx, rx) = mpsc::channel();
        tx.send(press(1)).unwrap();
        tx.send(ControlMsg::Shutdown).unwrap();
        let running = AtomicBool::new(true);
        assert!(!sup.idle(&rx, &running, Duration::from_secs(5)));
    }

    #[test]
    fn idle_returns_when_wait_elapses() {
        let sup = supervisor(vec![], MockDialer::default());
        let (_tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);
        let start = Instant::now();
        assert!(sup.idle(&rx, &running, ms(30)));
        assert!(start.elapsed() >= ms(30));
    }

    #[test]
    fn drain_discards_stale_presses() {
        let (tx, rx) = mpsc::channel();
        tx.send(press(1)).unwrap();
        tx.send(ControlMsg::KeepAlive).unwrap();
        assert!(drain(&rx));
        assert!(rx.try_recv().is_err());
        tx.send(ControlMsg::Shutdown).unwrap();
        assert!(!drain(&rx));
    }
}
