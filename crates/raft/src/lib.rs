//! Minimal single-cluster Raft node (`spec.md` §4.10), grounded directly
//! on `original_source/src/utilities/raft.cpp`'s `RaftNode`: the same
//! three-role state machine, the same randomized `[150,300]ms` election
//! timeout racing a 50ms leader heartbeat, and the same full-log-install
//! replication (a heartbeat carries the entire serialized log rather than
//! index-matched entries -- see the open question this leaves in
//! `DESIGN.md`). Thread ownership follows the teacher's worker shape:
//! a long-lived election thread, and a heartbeat thread that exists only
//! while this node is Leader.

mod message;

pub use message::{parse_log, serialize_log, LogEntry, RaftMessage};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use simplidfs_config::MetricsRegistry;
use tracing::info;

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);
const ELECTION_POLL_INTERVAL: Duration = Duration::from_millis(10);
const ELECTION_TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 150..=300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl RaftRole {
    pub fn label(self) -> &'static str {
        match self {
            RaftRole::Follower => "follower",
            RaftRole::Candidate => "candidate",
            RaftRole::Leader => "leader",
        }
    }

    /// Gauge value for `simplidfs_raft_role{node}` -- the facade only
    /// stores numeric series, so the role rides as an ordinal.
    fn code(self) -> f64 {
        match self {
            RaftRole::Follower => 0.0,
            RaftRole::Candidate => 1.0,
            RaftRole::Leader => 2.0,
        }
    }
}

struct State {
    role: RaftRole,
    current_term: u64,
    voted_for: Option<String>,
    current_leader: Option<String>,
    log: Vec<LogEntry>,
    commit_index: usize,
    vote_count: usize,
    last_heartbeat: Instant,
}

impl State {
    fn fresh() -> Self {
        Self {
            role: RaftRole::Follower,
            current_term: 0,
            voted_for: None,
            current_leader: None,
            log: Vec::new(),
            commit_index: 0,
            vote_count: 0,
            last_heartbeat: Instant::now(),
        }
    }
}

pub type SendFn = Box<dyn Fn(&str, RaftMessage) + Send + Sync>;
pub type ApplyFn = Box<dyn Fn(&str) + Send + Sync>;

pub struct RaftNode {
    id: String,
    peers: Vec<String>,
    send: SendFn,
    apply: ApplyFn,
    metrics: Arc<MetricsRegistry>,
    state: Mutex<State>,
    running: Arc<AtomicBool>,
    election_handle: StdMutex<Option<JoinHandle<()>>>,
    heartbeat_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl RaftNode {
    pub fn new(
        id: impl Into<String>,
        peers: Vec<String>,
        send: SendFn,
        apply: ApplyFn,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let node = Self {
            id: id.into(),
            peers,
            send,
            apply,
            metrics,
            state: Mutex::new(State::fresh()),
            running: Arc::new(AtomicBool::new(false)),
            election_handle: StdMutex::new(None),
            heartbeat_handle: StdMutex::new(None),
        };
        node.publish_role(RaftRole::Follower);
        node.publish_commit_index(0);
        node
    }

    /// `simplidfs_raft_role{node}` (`spec.md` §4.10, `SPEC_FULL.md` §10.4).
    fn publish_role(&self, role: RaftRole) {
        self.metrics.set_gauge("simplidfs_raft_role", role.code(), &[("node", self.id.as_str())]);
    }

    /// `simplidfs_raft_commit_index{node}`.
    fn publish_commit_index(&self, commit_index: usize) {
        self.metrics.set_gauge("simplidfs_raft_commit_index", commit_index as f64, &[("node", self.id.as_str())]);
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().role == RaftRole::Leader
    }

    pub fn role(&self) -> RaftRole {
        self.state.lock().role
    }

    pub fn current_leader(&self) -> Option<String> {
        self.state.lock().current_leader.clone()
    }

    pub fn current_term(&self) -> u64 {
        self.state.lock().current_term
    }

    pub fn commit_index(&self) -> usize {
        self.state.lock().commit_index
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.state.lock().log.clone()
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.lock().last_heartbeat = Instant::now();
        let node = self.clone();
        *self.election_handle.lock().unwrap() = Some(std::thread::spawn(move || node.election_loop()));
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.election_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.heartbeat_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// A literal zero-peer "cluster" can never elect itself under the
    /// original design: majority is only checked on receipt of a
    /// `RequestVoteResponse`, which never arrives with no peers to ask.
    /// Single-node deployments call this once before `start()` instead of
    /// waiting on an election that can't happen.
    pub fn bootstrap_single_node(self: &Arc<Self>) {
        if !self.peers.is_empty() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            state.role = RaftRole::Leader;
            state.current_leader = Some(self.id.clone());
        }
        self.become_leader();
    }

    fn random_timeout() -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(ELECTION_TIMEOUT_RANGE_MS))
    }

    fn election_loop(self: Arc<Self>) {
        let mut timeout = Self::random_timeout();
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(ELECTION_POLL_INTERVAL);
            let should_start = {
                let mut state = self.state.lock();
                if state.role == RaftRole::Leader {
                    false
                } else if state.last_heartbeat.elapsed() > timeout {
                    state.role = RaftRole::Candidate;
                    state.current_term += 1;
                    state.voted_for = Some(self.id.clone());
                    state.vote_count = 1;
                    state.last_heartbeat = Instant::now();
                    timeout = Self::random_timeout();
                    true
                } else {
                    false
                }
            };
            if should_start {
                self.publish_role(RaftRole::Candidate);
                self.start_election();
            }
        }
    }

    fn start_election(&self) {
        let term = self.state.lock().current_term;
        info!(id = %self.id, term, "starting election");
        for peer in &self.peers {
            (self.send)(peer, RaftMessage::RequestVote { term });
        }
    }

    fn become_follower(&self, term: u64) {
        {
            let mut state = self.state.lock();
            state.role = RaftRole::Follower;
            state.current_term = term;
            state.current_leader = None;
            state.voted_for = None;
        }
        self.publish_role(RaftRole::Follower);
    }

    fn become_leader(self: &Arc<Self>) {
        self.publish_role(RaftRole::Leader);
        info!(id = %self.id, "became leader");
        let node = self.clone();
        let mut handle = self.heartbeat_handle.lock().unwrap();
        if let Some(old) = handle.take() {
            let _ = old.join();
        }
        *handle = Some(std::thread::spawn(move || node.heartbeat_loop()));
    }

    fn heartbeat_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let (term, log, still_leader) = {
                let state = self.state.lock();
                (state.current_term, state.log.clone(), state.role == RaftRole::Leader)
            };
            if !still_leader {
                return;
            }
            let wire_log = serialize_log(&log);
            for peer in &self.peers {
                (self.send)(peer, RaftMessage::AppendEntries { term, log: wire_log.clone() });
            }
            std::thread::sleep(HEARTBEAT_INTERVAL);
        }
    }

    /// Takes `Arc<Self>` because a winning vote tally may spawn the
    /// heartbeat thread, which needs its own owned handle back to this node.
    pub fn handle_message(self: &Arc<Self>, from: &str, msg: RaftMessage) {
        match msg {
            RaftMessage::AppendEntries { term, log } => {
                let (resp_term, new_commands, became_follower, new_commit_index) = {
                    let mut state = self.state.lock();
                    if term < state.current_term {
                        (state.current_term, Vec::new(), false, None)
                    } else {
                        state.current_term = term;
                        state.current_leader = Some(from.to_string());
                        state.role = RaftRole::Follower;
                        state.voted_for = None;
                        state.last_heartbeat = Instant::now();
                        state.log = parse_log(&log);
                        let old_commit = state.commit_index;
                        let new_commands = if state.log.len() > old_commit {
                            let commands: Vec<String> =
                                state.log[old_commit..].iter().map(|e| e.command.clone()).collect();
                            state.commit_index = state.log.len();
                            commands
                        } else {
                            Vec::new()
                        };
                        (state.current_term, new_commands, true, Some(state.commit_index))
                    }
                };
                if became_follower {
                    self.publish_role(RaftRole::Follower);
                }
                if let Some(commit_index) = new_commit_index {
                    self.publish_commit_index(commit_index);
                }
                (self.send)(from, RaftMessage::AppendEntriesResponse { term: resp_term });
                for command in new_commands {
                    (self.apply)(&command);
                }
            }
            RaftMessage::AppendEntriesResponse { .. } => {}
            RaftMessage::RequestVote { term } => {
                let (resp_term, granted, stepped_down) = {
                    let mut state = self.state.lock();
                    let mut stepped_down = false;
                    if term > state.current_term {
                        state.current_term = term;
                        state.role = RaftRole::Follower;
                        state.voted_for = None;
                        stepped_down = true;
                    }
                    let granted = term == state.current_term
                        && state.voted_for.as_deref().map_or(true, |v| v == from);
                    if granted {
                        state.voted_for = Some(from.to_string());
                        state.last_heartbeat = Instant::now();
                    }
                    (state.current_term, granted, stepped_down)
                };
                if stepped_down {
                    self.publish_role(RaftRole::Follower);
                }
                (self.send)(from, RaftMessage::RequestVoteResponse { term: resp_term, granted });
            }
            RaftMessage::RequestVoteResponse { term, granted } => {
                let mut revert_to = None;
                let mut won = false;
                {
                    let mut state = self.state.lock();
                    if state.role == RaftRole::Candidate {
                        if term > state.current_term {
                            revert_to = Some(term);
                        } else if granted {
                            state.vote_count += 1;
                            if state.vote_count > (self.peers.len() + 1) / 2 {
                                state.role = RaftRole::Leader;
                                state.current_leader = Some(self.id.clone());
                                won = true;
                            }
                        }
                    }
                }
                if let Some(term) = revert_to {
                    self.become_follower(term);
                } else if won {
                    self.become_leader();
                }
            }
            RaftMessage::InstallSnapshot { snapshot_index, snapshot_term, bytes: _ } => {
                {
                    let mut state = self.state.lock();
                    state.log.clear();
                    state.commit_index = snapshot_index as usize;
                    state.current_term = state.current_term.max(snapshot_term);
                }
                self.publish_commit_index(snapshot_index as usize);
            }
        }
    }

    /// Valid only on the Leader; a non-leader call is a silent no-op, same
    /// as the original's `appendCommand`.
    pub fn append_command(&self, command: String) {
        let (committed, is_leader, new_commit_index) = {
            let mut state = self.state.lock();
            if state.role != RaftRole::Leader {
                (None, false, None)
            } else {
                state.log.push(LogEntry {
                    term: state.current_term,
                    command: command.clone(),
                });
                state.commit_index = state.log.len();
                (Some(command), true, Some(state.commit_index))
            }
        };
        if is_leader {
            if let Some(commit_index) = new_commit_index {
                self.publish_commit_index(commit_index);
            }
            if let Some(command) = committed {
                (self.apply)(&command);
            }
        }
    }

    /// Discards log entries with index `< up_to_index`; `commit_index` is
    /// rebased to match.
    pub fn compact(&self, up_to_index: usize) {
        let new_commit_index = {
            let mut state = self.state.lock();
            let cut = up_to_index.min(state.log.len());
            state.log.drain(0..cut);
            state.commit_index = state.commit_index.saturating_sub(cut);
            state.commit_index
        };
        self.publish_commit_index(new_commit_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdSyncMutex;

    /// In-memory network: `handle_message` is invoked synchronously on the
    /// addressed node, mirroring the injected `SendFunc` the original
    /// accepts in place of a real socket.
    struct Network {
        nodes: StdSyncMutex<HashMap<String, Arc<RaftNode>>>,
    }

    fn build_cluster(ids: &[&str]) -> (Arc<Network>, Vec<Arc<RaftNode>>) {
        let network = Arc::new(Network {
            nodes: StdSyncMutex::new(HashMap::new()),
        });
        let mut nodes = Vec::new();
        for &id in ids {
            let peers: Vec<String> = ids.iter().filter(|&&p| p != id).map(|s| s.to_string()).collect();
            let net = network.clone();
            let id_owned = id.to_string();
            let send: SendFn = Box::new(move |peer, msg| {
                let net = net.clone();
                let peer = peer.to_string();
                let from = id_owned.clone();
                if let Some(target) = net.nodes.lock().unwrap().get(&peer).cloned() {
                    target.handle_message(&from, msg);
                }
            });
            let applied: ApplyFn = Box::new(|_cmd: &str| {});
            let node = Arc::new(RaftNode::new(id, peers, send, applied, Arc::new(MetricsRegistry::new())));
            nodes.push(node);
        }
        {
            let mut guard = network.nodes.lock().unwrap();
            for (id, node) in ids.iter().zip(nodes.iter()) {
                guard.insert(id.to_string(), node.clone());
            }
        }
        (network, nodes)
    }

    #[test]
    fn bootstrap_single_node_promotes_immediately() {
        let node = Arc::new(RaftNode::new("solo", vec![], Box::new(|_, _| {}), Box::new(|_| {}), Arc::new(MetricsRegistry::new())));
        node.bootstrap_single_node();
        assert!(node.is_leader());
        node.stop();
    }

    #[test]
    fn a_node_with_no_peers_never_self_promotes_without_a_vote_response() {
        // Matches the original: the majority check only runs when a
        // RequestVoteResponse arrives, so a zero-peer node stays Candidate
        // through the election loop's self-vote alone.
        let node = Arc::new(RaftNode::new("solo", vec![], Box::new(|_, _| {}), Box::new(|_| {}), Arc::new(MetricsRegistry::new())));
        node.start();
        std::thread::sleep(Duration::from_millis(400));
        assert!(!node.is_leader());
        node.stop();
    }

    #[test]
    fn three_node_cluster_converges_on_exactly_one_leader() {
        let (_net, nodes) = build_cluster(&["a", "b", "c"]);
        for node in &nodes {
            node.start();
        }
        std::thread::sleep(Duration::from_millis(800));
        let leaders: Vec<_> = nodes.iter().filter(|n| n.is_leader()).collect();
        assert_eq!(leaders.len(), 1, "expected exactly one leader, roles: {:?}", nodes.iter().map(|n| n.role()).collect::<Vec<_>>());
        for node in &nodes {
            node.stop();
        }
    }

    /// spec.md §8 scenario (f), part 2: killing the leader forces the
    /// remaining two nodes to elect a new one inside the 300ms timeout
    /// range plus slack.
    #[test]
    fn killing_the_leader_triggers_reelection_within_two_seconds() {
        let (net, nodes) = build_cluster(&["a", "b", "c"]);
        for node in &nodes {
            node.start();
        }
        std::thread::sleep(Duration::from_millis(800));
        let leader_idx = nodes.iter().position(|n| n.is_leader()).expect("a leader elected");
        let leader_id = nodes[leader_idx].id.clone();
        net.nodes.lock().unwrap().remove(&leader_id);
        nodes[leader_idx].stop();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut new_leader = None;
        while Instant::now() < deadline {
            let survivors: Vec<_> = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != leader_idx)
                .filter(|(_, n)| n.is_leader())
                .collect();
            if survivors.len() == 1 {
                new_leader = Some(survivors[0].0);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(new_leader.is_some(), "no new leader elected within 2s of the old one dying");
        for (i, node) in nodes.iter().enumerate() {
            if i != leader_idx {
                node.stop();
            }
        }
    }

    /// spec.md §8 scenario (f), part 3: once the old leader rejoins, its
    /// log converges with the new leader's through the ordinary heartbeat
    /// full-log-install path.
    #[test]
    fn a_rejoining_former_leader_converges_its_log_with_the_new_leader() {
        let (net, nodes) = build_cluster(&["a", "b", "c"]);
        for node in &nodes {
            node.start();
        }
        std::thread::sleep(Duration::from_millis(800));
        let old_leader_idx = nodes.iter().position(|n| n.is_leader()).expect("a leader elected");
        let old_leader_id = nodes[old_leader_idx].id.clone();
        net.nodes.lock().unwrap().remove(&old_leader_id);
        nodes[old_leader_idx].stop();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut new_leader_idx = None;
        while Instant::now() < deadline {
            if let Some(i) = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != old_leader_idx)
                .find(|(_, n)| n.is_leader())
                .map(|(i, _)| i)
            {
                new_leader_idx = Some(i);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let new_leader_idx = new_leader_idx.expect("a replacement leader elected");
        nodes[new_leader_idx].append_command("write:after-failover".to_string());
        std::thread::sleep(Duration::from_millis(200));

        net.nodes.lock().unwrap().insert(old_leader_id, nodes[old_leader_idx].clone());
        nodes[old_leader_idx].start();
        std::thread::sleep(Duration::from_millis(500));

        assert_eq!(nodes[old_leader_idx].log(), nodes[new_leader_idx].log());
        assert!(!nodes[old_leader_idx].is_leader());
        for node in &nodes {
            node.stop();
        }
    }

    #[test]
    fn append_command_on_the_leader_commits_immediately() {
        let (_net, nodes) = build_cluster(&["a", "b", "c"]);
        for node in &nodes {
            node.start();
        }
        std::thread::sleep(Duration::from_millis(800));
        let leader = nodes.iter().find(|n| n.is_leader()).expect("a leader elected");
        leader.append_command("write:f".to_string());
        assert_eq!(leader.commit_index(), 1);
        for node in &nodes {
            node.stop();
        }
    }

    #[test]
    fn non_leader_append_command_is_a_silent_no_op() {
        let follower = Arc::new(RaftNode::new("f", vec![], Box::new(|_, _| {}), Box::new(|_| {}), Arc::new(MetricsRegistry::new())));
        follower.append_command("x".into());
        assert_eq!(follower.commit_index(), 0);
        assert!(follower.log().is_empty());
    }

    #[test]
    fn compact_discards_entries_before_the_cut_and_rebases_commit_index() {
        let node = Arc::new(RaftNode::new("a", vec![], Box::new(|_, _| {}), Box::new(|_| {}), Arc::new(MetricsRegistry::new())));
        {
            let mut state = node.state.lock();
            state.role = RaftRole::Leader;
            state.log = vec![
                LogEntry { term: 1, command: "one".into() },
                LogEntry { term: 1, command: "two".into() },
                LogEntry { term: 2, command: "three".into() },
            ];
            state.commit_index = 3;
        }
        node.compact(2);
        assert_eq!(node.log(), vec![LogEntry { term: 2, command: "three".into() }]);
        assert_eq!(node.commit_index(), 1);
    }

    #[test]
    fn install_snapshot_clears_the_log_and_rebases_commit_index() {
        let node = Arc::new(RaftNode::new("a", vec![], Box::new(|_, _| {}), Box::new(|_| {}), Arc::new(MetricsRegistry::new())));
        node.handle_message(
            "leader",
            RaftMessage::InstallSnapshot {
                snapshot_index: 42,
                snapshot_term: 5,
                bytes: vec![],
            },
        );
        assert!(node.log().is_empty());
        assert_eq!(node.commit_index(), 42);
        assert_eq!(node.current_term(), 5);
    }
}
