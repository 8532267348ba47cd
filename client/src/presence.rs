use protocol::Member;
use tokio::sync::watch;

/// A membership change after schema validation. Raw broker frames are
/// validated by the dispatcher before they become one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Broker snapshot delivered on subscription success.
    Snapshot(Vec<Member>),
    Added(Member),
    Removed(String),
    /// Unsubscribe or disconnect; stale members are never resurrected.
    Clear,
}

/// Pure fold of one membership event into the member list. Insert and delete
/// are idempotent, and join order is preserved.
pub fn fold(mut members: Vec<Member>, event: &PresenceEvent) -> Vec<Member> {
    match event {
        PresenceEvent::Snapshot(snapshot) => {
            let mut next: Vec<Member> = Vec::with_capacity(snapshot.len());
            for member in snapshot {
                if !next.iter().any(|m| m.id == member.id) {
                    next.push(member.clone());
                }
            }
            next
        }
        PresenceEvent::Added(member) => {
            if !members.iter().any(|m| m.id == member.id) {
                members.push(member.clone());
            }
            members
        }
        PresenceEvent::Removed(id) => {
            members.retain(|m| m.id != *id);
            members
        }
        PresenceEvent::Clear => Vec::new(),
    }
}

/// The member list for one joined channel: a plain read value plus a change
/// notification stream.
pub struct PresenceState {
    tx: watch::Sender<Vec<Member>>,
}

impl PresenceState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { tx }
    }

    pub fn members(&self) -> Vec<Member> {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Member>> {
        self.tx.subscribe()
    }

    pub fn apply(&self, event: &PresenceEvent) {
        self.tx.send_modify(|members| {
            *members = fold(std::mem::take(members), event);
        });
    }

    pub fn clear(&self) {
        self.apply(&PresenceEvent::Clear);
    }
}

impl Default for PresenceState {
    fn default() -> Self {
        Self::new()
    }
}
