//! SWIM membership over UDP, driven by foca.
//!
//! [`SwimSession`] owns a background task that feeds datagrams and timer
//! events into a [`foca::Foca`] instance and ships whatever foca wants sent.
//! Member-up/member-down notifications maintain a shared live view that the
//! handle reads without touching the task.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use flock_types::{Member, MembershipEvent};
use foca::{
    AccumulatingRuntime, Codec, Foca, Header, Message, NoCustomBroadcast, OwnedNotification,
    PeriodicParams, PostcardCodec, Timer,
};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{MAX_GOSSIP_PACKET_SIZE, PeerConfig};
use crate::error::ClusterError;
use crate::identity::NodeIdentity;
use crate::session::GossipSession;

/// Largest datagram we accept; senders are capped at `MAX_GOSSIP_PACKET_SIZE`.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Probe periods a member may stay suspect before being declared down.
const SUSPICION_PROBES: u32 = 4;

/// Capacity of the membership event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Room for the local identity when an announce header is re-encoded.
const HEADER_SLACK: usize = 256;

type Swim = Foca<NodeIdentity, PostcardCodec, SmallRng, NoCustomBroadcast>;

enum Command {
    Announce(Vec<SocketAddr>),
    Leave(oneshot::Sender<()>),
}

/// State shared between the session handle and its driver task.
struct Shared {
    local: Member,
    /// Remote live members keyed by advertised address.
    view: RwLock<BTreeMap<SocketAddr, Member>>,
    events: broadcast::Sender<MembershipEvent>,
    /// Bumped on every view change.
    changes: watch::Sender<u64>,
    /// Bumped on every announce reply received.
    answers: watch::Sender<u64>,
}

impl Shared {
    fn knows(&self, addr: &SocketAddr) -> bool {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(addr)
    }

    /// Seeds among `targets` that count as joined.
    ///
    /// A seed dialled through an address other than the one it advertises
    /// never shows up under that address, so each announce reply also
    /// accounts for one seed that is not in the view.
    fn reached(&self, targets: &[SocketAddr], answers: u64) -> usize {
        let known = targets.iter().filter(|a| self.knows(a)).count();
        let unknown = (targets.len() - known) as u64;
        known + answers.min(unknown) as usize
    }

    fn apply(&self, notification: OwnedNotification<NodeIdentity>) {
        match notification {
            OwnedNotification::MemberUp(id) => self.member_up(Member::from(id)),
            OwnedNotification::MemberDown(id) => self.member_down(&id),
            OwnedNotification::Rename(old, new) => {
                if old.name != new.name || old.addr != new.addr {
                    self.member_down(&old);
                    self.member_up(Member::from(new));
                }
            }
            OwnedNotification::Idle => warn!("no reachable members, gossip session idle"),
            OwnedNotification::Defunct => error!("local node was declared down by the cluster"),
            other => debug!(notification = ?other, "gossip notification"),
        }
    }

    fn member_up(&self, member: Member) {
        if member.address() == self.local.address() {
            return;
        }

        let changed = {
            let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
            view.insert(member.address(), member.clone()).as_ref() != Some(&member)
        };

        if changed {
            info!(%member, "member joined");
            self.changes.send_modify(|v| *v += 1);
            let _ = self.events.send(MembershipEvent::Joined(member));
        }
    }

    fn member_down(&self, id: &NodeIdentity) {
        let removed = {
            let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
            match view.get(&id.addr) {
                Some(m) if m.name == id.name => view.remove(&id.addr),
                _ => None,
            }
        };

        if let Some(member) = removed {
            info!(%member, "member left");
            self.changes.send_modify(|v| *v += 1);
            let _ = self.events.send(MembershipEvent::Left(member));
        }
    }
}

/// Handle to a running SWIM session.
pub struct SwimSession {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    /// Bound on how long a join waits for seeds to show up in the view.
    request_timeout: Duration,
    task: JoinHandle<()>,
}

impl SwimSession {
    /// Bind the gossip socket and start the protocol task.
    ///
    /// An `advertise` port of `0` is replaced by the port actually bound.
    pub async fn start(
        name: String,
        bind: SocketAddr,
        advertise: SocketAddr,
        config: &PeerConfig,
        gossip_fanout: usize,
    ) -> Result<Self, ClusterError> {
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| ClusterError::SessionCreate(format!("bind {bind}: {e}")))?;
        let bound = socket
            .local_addr()
            .map_err(|e| ClusterError::SessionCreate(e.to_string()))?;

        let advertise = if advertise.port() == 0 {
            SocketAddr::new(advertise.ip(), bound.port())
        } else {
            advertise
        };

        let identity = NodeIdentity::new(name, advertise);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (changes, _) = watch::channel(0);
        let (answers, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            local: Member::from(&identity),
            view: RwLock::new(BTreeMap::new()),
            events,
            changes,
            answers,
        });

        let (commands, command_rx) = mpsc::channel(64);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            socket,
            shared: shared.clone(),
            runtime: AccumulatingRuntime::new(),
            codec: PostcardCodec,
            timer_tx,
        };
        let task = tokio::spawn(driver.run(
            identity,
            foca_config(config, gossip_fanout),
            command_rx,
            timer_rx,
        ));

        info!(
            name = %shared.local.name,
            %bound,
            advertise = %shared.local.address(),
            gossip_fanout,
            "gossip session started"
        );

        Ok(Self {
            shared,
            commands,
            request_timeout: config.tcp_timeout,
            task,
        })
    }

    /// Check whether the background task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SwimSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait::async_trait]
impl GossipSession for SwimSession {
    async fn join(&self, addrs: &[String]) -> Result<usize, ClusterError> {
        let local = self.shared.local.address();
        let mut joined = 0;
        let mut targets = Vec::new();
        let mut last_error = None;

        for addr in addrs {
            match addr.parse::<SocketAddr>() {
                Ok(a) if a == local => joined += 1,
                Ok(a) => targets.push(a),
                Err(e) => {
                    debug!(%addr, %e, "not a socket address, skipping");
                    last_error = Some(format!("{addr}: {e}"));
                }
            }
        }

        if !targets.is_empty() {
            let mut changes = self.shared.changes.subscribe();
            let mut answers = self.shared.answers.subscribe();
            let answered_before = *answers.borrow_and_update();
            self.commands
                .send(Command::Announce(targets.clone()))
                .await
                .map_err(|_| ClusterError::SessionStopped)?;

            // Wait for the seeds to answer and show up in the view.
            let deadline = tokio::time::Instant::now() + self.request_timeout;
            let answered = |answers: &watch::Receiver<u64>| *answers.borrow() - answered_before;
            while self.shared.reached(&targets, answered(&answers)) < targets.len() {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = answers.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }

            let reached = self.shared.reached(&targets, answered(&answers));
            if reached < targets.len() {
                last_error = Some(format!(
                    "{} of {} seeds did not answer within {:?}",
                    targets.len() - reached,
                    targets.len(),
                    self.request_timeout
                ));
            }
            joined += reached;
        }

        if joined == 0 && !addrs.is_empty() {
            return Err(ClusterError::Join(
                last_error.unwrap_or_else(|| "no seed reachable".to_string()),
            ));
        }
        Ok(joined)
    }

    async fn leave(&self, timeout: Duration) -> Result<(), ClusterError> {
        let (reply, done) = oneshot::channel();
        let request = async {
            self.commands
                .send(Command::Leave(reply))
                .await
                .map_err(|_| ClusterError::SessionStopped)?;
            done.await.map_err(|_| ClusterError::SessionStopped)
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ClusterError::LeaveTimeout(timeout))?
    }

    fn members(&self) -> Vec<Member> {
        let view = self.shared.view.read().unwrap_or_else(PoisonError::into_inner);
        let mut members = Vec::with_capacity(view.len() + 1);
        members.push(self.shared.local.clone());
        members.extend(view.values().cloned());
        members
    }

    fn local_node(&self) -> Member {
        self.shared.local.clone()
    }

    fn num_members(&self) -> usize {
        self.shared
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
            + 1
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.shared.events.subscribe()
    }
}

/// The task side of a [`SwimSession`]: socket I/O and timers.
struct Driver {
    socket: UdpSocket,
    shared: Arc<Shared>,
    runtime: AccumulatingRuntime<NodeIdentity>,
    /// Header codec matching the one foca uses on the wire.
    codec: PostcardCodec,
    timer_tx: mpsc::UnboundedSender<Timer<NodeIdentity>>,
}

impl Driver {
    async fn run(
        mut self,
        identity: NodeIdentity,
        config: foca::Config,
        mut commands: mpsc::Receiver<Command>,
        mut timers: mpsc::UnboundedReceiver<Timer<NodeIdentity>>,
    ) {
        let mut foca: Swim = Foca::new(identity, config, SmallRng::from_os_rng(), PostcardCodec);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        let leave_reply = loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.receive(&mut foca, &buf[..len], from),
                    Err(e) => warn!(%e, "gossip socket receive failed"),
                },
                Some(timer) = timers.recv() => {
                    if let Err(e) = foca.handle_timer(timer, &mut self.runtime) {
                        debug!(%e, "gossip timer failed");
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Announce(addrs)) => {
                        for addr in addrs {
                            debug!(%addr, "announcing to seed");
                            let seed = NodeIdentity::seed(addr);
                            if let Err(e) = foca.announce(seed, &mut self.runtime) {
                                debug!(%addr, %e, "announce failed");
                            }
                        }
                    }
                    Some(Command::Leave(reply)) => break Some(reply),
                    None => break None,
                },
            }

            self.flush().await;
        };

        let Some(reply) = leave_reply else {
            debug!("gossip session handle dropped, stopping");
            return;
        };

        if let Err(e) = foca.leave_cluster(&mut self.runtime) {
            warn!(%e, "failed to broadcast leave");
        }
        self.flush().await;
        info!("left gossip cluster");
        let _ = reply.send(());
    }

    /// Hand one datagram to foca.
    ///
    /// foca drops anything not addressed to the local identity. A joiner
    /// only knows the address it dialled, which may be a service or NAT
    /// address of ours, so announces get their destination rewritten to the
    /// local identity first.
    fn receive(&mut self, foca: &mut Swim, data: &[u8], from: SocketAddr) {
        let mut rest = data;
        let header: Header<NodeIdentity> = match self.codec.decode_header(&mut rest) {
            Ok(header) => header,
            Err(e) => {
                debug!(%from, ?e, "undecodable gossip datagram");
                return;
            }
        };

        let readdressed = match header.message {
            Message::Feed => {
                self.shared.answers.send_modify(|n| *n += 1);
                None
            }
            Message::Announce if header.dst.addr != foca.identity().addr => {
                debug!(%from, dialled = %header.dst.addr, "announce to an alias of this node");
                self.readdress(header, foca.identity().clone(), rest)
            }
            _ => None,
        };

        let data = readdressed.as_deref().unwrap_or(data);
        if let Err(e) = foca.handle_data(data, &mut self.runtime) {
            debug!(%from, %e, "rejected gossip datagram");
        }
    }

    /// Re-encode `header` addressed to `local`, followed by the untouched
    /// piggybacked updates in `rest`.
    fn readdress(
        &mut self,
        mut header: Header<NodeIdentity>,
        local: NodeIdentity,
        rest: &[u8],
    ) -> Option<Vec<u8>> {
        header.dst = local;
        let mut out = Vec::with_capacity(rest.len() + HEADER_SLACK);
        if let Err(e) = self.codec.encode_header(&header, &mut out) {
            debug!(?e, "failed to re-encode announce header");
            return None;
        }
        out.extend_from_slice(rest);
        Some(out)
    }

    /// Ship everything foca queued: datagrams, timers, notifications.
    async fn flush(&mut self) {
        while let Some((to, data)) = self.runtime.to_send() {
            if let Err(e) = self.socket.send_to(&data, to.addr).await {
                debug!(to = %to.addr, %e, "gossip send failed");
            }
        }

        while let Some((after, timer)) = self.runtime.to_schedule() {
            let timers = self.timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let _ = timers.send(timer);
            });
        }

        while let Some(notification) = self.runtime.to_notify() {
            self.shared.apply(notification);
        }
    }
}

/// Map peer configuration onto foca's SWIM tuning.
fn foca_config(config: &PeerConfig, gossip_fanout: usize) -> foca::Config {
    let mut foca_config = foca::Config::simple();
    foca_config.probe_period = config.probe_interval;
    foca_config.probe_rtt = config.probe_timeout;
    foca_config.suspect_to_down_after = config.probe_interval * SUSPICION_PROBES;
    foca_config.remove_down_after = config.reconnect_timeout;
    foca_config.max_packet_size = non_zero(MAX_GOSSIP_PACKET_SIZE);
    foca_config.periodic_gossip = Some(PeriodicParams {
        frequency: config.gossip_interval,
        num_members: non_zero(gossip_fanout),
    });
    foca_config.periodic_announce = Some(PeriodicParams {
        frequency: config.push_pull_interval,
        num_members: NonZeroUsize::MIN,
    });
    foca_config.periodic_announce_to_down_members = Some(PeriodicParams {
        frequency: config.reconnect_interval,
        num_members: NonZeroUsize::MIN,
    });
    foca_config
}

fn non_zero(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}
