use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HapticPattern {
    /// Light repeating ticks while the shutter is held.
    HoldTick,
    /// Single confirmation pulse when the capture fires.
    CaptureConfirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HapticsOperation {
    Start { pattern: HapticPattern },
    Stop,
}

impl Operation for HapticsOperation {
    type Output = ();
}

/// Fire-and-forget haptic feedback. Nothing comes back from the shell.
pub struct Haptics<E> {
    context: CapabilityContext<HapticsOperation, E>,
}

impl<Ev> Capability<Ev> for Haptics<Ev> {
    type Operation = HapticsOperation;
    type MappedSelf<MappedEv> = Haptics<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Haptics::new(self.context.map_event(f))
    }
}

impl<E> Haptics<E>
where
    E: Send + 'static,
{
    pub fn new(context: CapabilityContext<HapticsOperation, E>) -> Self {
        Self { context }
    }

    pub fn start(&self, pattern: HapticPattern) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(HapticsOperation::Start { pattern })
                .await;
        });
    }

    pub fn stop(&self) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(HapticsOperation::Stop).await;
        });
    }
}

pub type HapticsCapability = Haptics<Event>;
