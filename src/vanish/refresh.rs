use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::node::Node;
use crate::vanish::{share_locations, Vdo};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

struct State {
    access_key: i64,
    vdo: Vdo,
    last_access: Instant,
}

/// A vanished payload whose shares are re-dispersed under a fresh access key whenever it has gone
/// unread for `Config::vanish_refresh_idle`.
///
/// Every refresh reads the payload back under the current key, vanishes it again and then
/// overwrites the old locations with empty values, so the previous access key stops working.
pub struct VanishHandle {
    node: Node,
    state: Arc<Mutex<State>>,
    is_active: Arc<AtomicBool>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<State> {
    match state.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl VanishHandle {
    /// Vanishes `payload` into `number_keys` shares through `node` and starts refreshing it.
    pub fn new(node: &Node, payload: &[u8], number_keys: u8) -> Result<Self> {
        let (access_key, vdo) = node.vanish(payload, number_keys, node.config().threshold_ratio)?;
        let handle = VanishHandle {
            node: node.clone(),
            state: Arc::new(Mutex::new(State {
                access_key,
                vdo,
                last_access: Instant::now(),
            })),
            is_active: Arc::new(AtomicBool::new(true)),
        };
        handle.start_refresher();
        Ok(handle)
    }

    /// Returns the access key currently in effect.
    pub fn access_key(&self) -> i64 {
        lock(&self.state).access_key
    }

    pub fn vdo(&self) -> Vdo {
        lock(&self.state).vdo.clone()
    }

    /// Reads the payload back and postpones the next refresh.
    pub fn unvanish(&self) -> Result<Vec<u8>> {
        let (access_key, vdo) = {
            let state = lock(&self.state);
            (state.access_key, state.vdo.clone())
        };
        let result = match self.node.unvanish(&vdo, access_key) {
            Err(_) if self.access_key() != access_key => {
                debug!("{} - Access key changed during unvanish, retrying", self.node.addr());
                let (access_key, vdo) = {
                    let state = lock(&self.state);
                    (state.access_key, state.vdo.clone())
                };
                self.node.unvanish(&vdo, access_key)
            },
            result => result,
        };
        if result.is_ok() {
            lock(&self.state).last_access = Instant::now();
        }
        result
    }

    /// Stops refreshing. The current dispersal is left in place.
    pub fn stop(&self) {
        self.is_active.store(false, Ordering::Release);
    }

    fn start_refresher(&self) {
        let node = self.node.clone();
        let state = Arc::clone(&self.state);
        let is_active = Arc::clone(&self.is_active);
        thread::spawn(move || {
            let idle = node.config().vanish_refresh_idle();
            let poll_interval = (idle / 4).max(MIN_POLL_INTERVAL).min(MAX_POLL_INTERVAL);
            loop {
                thread::sleep(poll_interval);
                if !is_active.load(Ordering::Acquire) || !node.is_active() {
                    break;
                }
                let (access_key, vdo) = {
                    let state = lock(&state);
                    if state.last_access.elapsed() < idle {
                        continue;
                    }
                    (state.access_key, state.vdo.clone())
                };
                if let Err(err) = refresh(&node, &state, access_key, &vdo) {
                    error!("{} - Could not refresh vanished data: {}", node.addr(), err);
                    break;
                }
            }
            debug!("{} - Killed vanish refresher", node.addr());
        });
    }
}

/// Re-disperses the payload of `vdo` under a fresh access key and invalidates the locations of
/// `access_key`.
fn refresh(node: &Node, state: &Mutex<State>, access_key: i64, vdo: &Vdo) -> Result<()> {
    let payload = node.unvanish(vdo, access_key)?;
    let ratio = f64::from(vdo.threshold) / f64::from(vdo.number_keys);
    let (new_access_key, new_vdo) = node.vanish(&payload, vdo.number_keys, ratio)?;

    {
        let mut state = lock(state);
        state.access_key = new_access_key;
        state.vdo = new_vdo;
        state.last_access = Instant::now();
    }

    for location in share_locations(access_key, vdo.number_keys as usize) {
        if let Err(err) = node.store(location, &[]) {
            warn!("{} - Could not clear share at {:?}: {}", node.addr(), location, err);
        }
    }
    info!("{} - Refreshed vanished data under a new access key", node.addr());
    Ok(())
}

impl Drop for VanishHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
