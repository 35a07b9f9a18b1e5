use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Identifies one armed timer. Ids are allocated monotonically by the
/// model; an expiry whose id no longer matches the armed one is stale and
/// must be ignored, so the shell never needs an explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerOperation {
    Start { id: TimerId, millis: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFired {
    pub id: TimerId,
}

impl Operation for TimerOperation {
    type Output = TimerFired;
}

/// One-shot delays driven by the shell: the capture hold countdown, the
/// invalid-photo reset, and retry backoff all go through here.
pub struct Timer<E> {
    context: CapabilityContext<TimerOperation, E>,
}

impl<Ev> Capability<Ev> for Timer<Ev> {
    type Operation = TimerOperation;
    type MappedSelf<MappedEv> = Timer<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Timer::new(self.context.map_event(f))
    }
}

impl<E> Timer<E>
where
    E: Send + 'static,
{
    pub fn new(context: CapabilityContext<TimerOperation, E>) -> Self {
        Self { context }
    }

    pub fn start<F>(&self, id: TimerId, millis: u64, make_event: F)
    where
        F: FnOnce(TimerFired) -> E + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let fired = context
                .request_from_shell(TimerOperation::Start { id, millis })
                .await;
            context.update_app(make_event(fired));
        });
    }
}

pub type TimerCapability = Timer<Event>;
