use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(DocumentType {
    ControlPriceApproval => "control_price_approval",
    PurchaseRequestApproval => "purchase_request_approval",
    Announcement => "announcement",
    ResultApproval => "result_approval",
    CandidatePublicity => "candidate_publicity",
    ResultPublicity => "result_publicity",
});

impl DocumentType {
    /// Every document type in case-workflow order.
    pub fn all() -> &'static [DocumentType] {
        &[
            Self::ControlPriceApproval,
            Self::PurchaseRequestApproval,
            Self::Announcement,
            Self::ResultApproval,
            Self::CandidatePublicity,
            Self::ResultPublicity,
        ]
    }

    /// Title printed on the paper form, used in review screens and rejection messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ControlPriceApproval => "控制价审批",
            Self::PurchaseRequestApproval => "采购申请审批",
            Self::Announcement => "采购公告",
            Self::ResultApproval => "采购结果审批",
            Self::CandidatePublicity => "中标候选人公示",
            Self::ResultPublicity => "中标结果公示",
        }
    }
}

// Declaration order matters: `Ord` ranks Missing < Low < High.
str_enum!(Confidence {
    Missing => "missing",
    Low => "low",
    High => "high",
});

str_enum!(ParserKind {
    Amount => "amount",
    Date => "date",
    Text => "text",
    Enumeration => "enumeration",
});

str_enum!(DraftState {
    Open => "open",
    ReadyForReview => "ready_for_review",
    UnderReview => "under_review",
    Committed => "committed",
    Discarded => "discarded",
    Expired => "expired",
});

impl DraftState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Discarded | Self::Expired)
    }

    /// Whether a re-upload for the case may re-run reconciliation on this draft.
    pub fn accepts_documents(&self) -> bool {
        matches!(self, Self::Open | Self::ReadyForReview)
    }

    /// Whether only the absolute draft TTL applies (the session TTL does not).
    pub fn is_reviewing(&self) -> bool {
        matches!(self, Self::UnderReview)
    }

    /// Explicit transitions a caller may request. Open ↔ ReadyForReview is
    /// derived from field status by the reconciler and Expired is set only by
    /// the store sweep, so neither appears here. Review opens only once no
    /// required field is missing; Discard is allowed from any live state.
    pub fn can_transition_to(&self, next: DraftState) -> bool {
        use DraftState::*;
        matches!(
            (self, next),
            (ReadyForReview, UnderReview)
                | (UnderReview, Committed)
                | (Open, Discarded)
                | (ReadyForReview, Discarded)
                | (UnderReview, Discarded)
        )
    }
}
