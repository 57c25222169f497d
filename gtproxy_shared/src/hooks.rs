//! Packet hook bus.
//!
//! One named event per traffic direction: `serverBoundPacket` and
//! `clientBoundPacket`. Subscribers run synchronously in registration
//! order over a mutable context; they may rewrite the raw frame or cancel
//! it. The bus never re-parses a mutated frame — keeping `raw` valid is
//! the mutator's responsibility.

use tracing::warn;

use crate::packet::ParsedPacket;

/// Traffic direction of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ServerBound,
    ClientBound,
}

impl Direction {
    /// The event name scripts subscribe to.
    pub fn event_name(self) -> &'static str {
        match self {
            Direction::ServerBound => "serverBoundPacket",
            Direction::ClientBound => "clientBoundPacket",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "serverBoundPacket" => Some(Direction::ServerBound),
            "clientBoundPacket" => Some(Direction::ClientBound),
            _ => None,
        }
    }
}

/// Mutable context handed to every subscriber.
pub struct PacketEvent {
    pub direction: Direction,
    pub channel_id: u8,
    pub parsed: ParsedPacket,
    pub raw: Vec<u8>,
    pub canceled: bool,
}

pub type PacketHook = Box<dyn FnMut(&mut PacketEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct HookBus {
    server_bound: Vec<PacketHook>,
    client_bound: Vec<PacketHook>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, direction: Direction, hook: PacketHook) {
        match direction {
            Direction::ServerBound => self.server_bound.push(hook),
            Direction::ClientBound => self.client_bound.push(hook),
        }
    }

    /// Subscribes by event name. Unknown names are logged and dropped.
    pub fn on(&mut self, event: &str, hook: PacketHook) {
        match Direction::from_event_name(event) {
            Some(direction) => self.subscribe(direction, hook),
            None => warn!(event, "unknown packet event"),
        }
    }

    /// Runs every subscriber for the event's direction. Subscriber errors
    /// are logged and never interrupt the chain.
    pub fn dispatch(&mut self, event: &mut PacketEvent) {
        let hooks = match event.direction {
            Direction::ServerBound => &mut self.server_bound,
            Direction::ClientBound => &mut self.client_bound,
        };
        for (i, hook) in hooks.iter_mut().enumerate() {
            if let Err(err) = hook(event) {
                warn!(
                    event = event.direction.event_name(),
                    subscriber = i,
                    error = %err,
                    "packet hook failed"
                );
            }
        }
    }

    pub fn subscriber_count(&self, direction: Direction) -> usize {
        match direction {
            Direction::ServerBound => self.server_bound.len(),
            Direction::ClientBound => self.client_bound.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::classify;

    fn event(direction: Direction, raw: Vec<u8>) -> PacketEvent {
        PacketEvent {
            direction,
            channel_id: 0,
            parsed: classify(&raw),
            raw,
            canceled: false,
        }
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let mut bus = HookBus::new();
        bus.subscribe(
            Direction::ServerBound,
            Box::new(|ev| {
                ev.raw.push(1);
                Ok(())
            }),
        );
        bus.subscribe(
            Direction::ServerBound,
            Box::new(|ev| {
                ev.raw.push(2);
                Ok(())
            }),
        );

        let mut ev = event(Direction::ServerBound, vec![]);
        bus.dispatch(&mut ev);
        assert_eq!(ev.raw, vec![1, 2]);
    }

    #[test]
    fn cancellation_sticks_and_errors_do_not_break_the_chain() {
        let mut bus = HookBus::new();
        bus.subscribe(Direction::ClientBound, Box::new(|_| anyhow::bail!("boom")));
        bus.subscribe(
            Direction::ClientBound,
            Box::new(|ev| {
                ev.canceled = true;
                Ok(())
            }),
        );

        let mut ev = event(Direction::ClientBound, vec![0, 0, 0, 0]);
        bus.dispatch(&mut ev);
        assert!(ev.canceled);
    }

    #[test]
    fn directions_are_independent() {
        let mut bus = HookBus::new();
        bus.on(
            "serverBoundPacket",
            Box::new(|ev| {
                ev.canceled = true;
                Ok(())
            }),
        );

        let mut ev = event(Direction::ClientBound, vec![]);
        bus.dispatch(&mut ev);
        assert!(!ev.canceled);
        assert_eq!(bus.subscriber_count(Direction::ServerBound), 1);
        assert_eq!(bus.subscriber_count(Direction::ClientBound), 0);
    }
}
