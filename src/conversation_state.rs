use crate::types::{ConversationTurn, SharedTranscript, Speaker};

/// Which of the ranked product offers is on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PitchTier {
    Tier1,
    Tier2,
    Tier3,
}

impl PitchTier {
    pub const MAX: PitchTier = PitchTier::Tier3;

    /// 1-based tier number.
    pub fn number(self) -> usize {
        self.index() + 1
    }

    /// 0-based position in the ranked product list.
    pub fn index(self) -> usize {
        match self {
            PitchTier::Tier1 => 0,
            PitchTier::Tier2 => 1,
            PitchTier::Tier3 => 2,
        }
    }

    pub fn from_number(number: usize) -> Option<Self> {
        match number {
            1 => Some(PitchTier::Tier1),
            2 => Some(PitchTier::Tier2),
            3 => Some(PitchTier::Tier3),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    FollowUpScheduled,
    ConversationEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    Pitching(PitchTier),
    Closed(CloseReason),
}

/// Callback agreed with the customer during the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFollowUp {
    pub preferred_time: String,
    pub confirmation: String,
}

/// Persuasion state of one call.  Mutated only from the call's conversation task.
pub struct ConversationState {
    phase: ScriptPhase,
    /// Tier being pitched; retained after the script closes.
    tier: PitchTier,
    /// Highest tier there is a product for.
    max_tier: PitchTier,
    /// Tiers actually presented to the customer, in order.  Never holds a tier twice.
    pitched: Vec<PitchTier>,
    /// Set when the tier advanced and the new offer has not been presented yet.
    pending_pitch: Option<PitchTier>,
    /// True while a knowledge lookup is in flight for the current turn.
    pub pending_lookup: bool,
    follow_up: Option<ScheduledFollowUp>,
    transcript: SharedTranscript,
}

impl ConversationState {
    pub fn new(product_count: usize, transcript: SharedTranscript) -> Self {
        let max_tier = PitchTier::from_number(product_count.clamp(1, PitchTier::MAX.number()))
            .unwrap_or(PitchTier::Tier1);
        Self {
            phase: ScriptPhase::Pitching(PitchTier::Tier1),
            tier: PitchTier::Tier1,
            max_tier,
            pitched: Vec::new(),
            pending_pitch: Some(PitchTier::Tier1),
            pending_lookup: false,
            follow_up: None,
            transcript,
        }
    }

    pub fn phase(&self) -> ScriptPhase {
        self.phase
    }

    pub fn tier(&self) -> PitchTier {
        self.tier
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, ScriptPhase::Closed(_))
    }

    pub fn pitched(&self) -> &[PitchTier] {
        &self.pitched
    }

    pub fn pending_pitch(&self) -> Option<PitchTier> {
        self.pending_pitch
    }

    pub fn follow_up(&self) -> Option<&ScheduledFollowUp> {
        self.follow_up.as_ref()
    }

    /// Move to the next offer after an objection.  Returns false when there is nothing left to
    /// offer or the script is already closed.
    pub fn advance_tier(&mut self) -> bool {
        if self.is_closed() || self.tier >= self.max_tier {
            return false;
        }
        let Some(next) = self.tier.next() else {
            return false;
        };
        self.tier = next;
        self.phase = ScriptPhase::Pitching(next);
        self.pending_pitch = Some(next);
        true
    }

    /// Record that the current tier's offer has been presented.
    pub fn mark_pitched(&mut self) {
        if let Some(tier) = self.pending_pitch.take() {
            if !self.pitched.contains(&tier) {
                self.pitched.push(tier);
            }
        }
    }

    pub fn close(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        self.phase = ScriptPhase::Closed(reason);
        self.pending_pitch = None;
    }

    pub fn record_follow_up(&mut self, follow_up: ScheduledFollowUp) {
        if self.follow_up.is_none() {
            self.follow_up = Some(follow_up);
        }
        self.close(CloseReason::FollowUpScheduled);
    }

    pub async fn push_turn(&self, speaker: Speaker, text: &str) {
        self.transcript
            .write()
            .await
            .push(ConversationTurn::new(speaker, text));
    }

    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.transcript.read().await.clone()
    }
}

/// What a finished conversation looked like, for logs.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub phase: ScriptPhase,
    pub pitched: Vec<PitchTier>,
    pub turns: usize,
}
