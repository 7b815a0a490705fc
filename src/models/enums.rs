use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
///
/// Variant declaration order doubles as the sort rank (`Ord`), so declare
/// variants in the order reviewers expect to see them ascending.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant),+]
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

str_enum!(ItemStatus {
    Pending => "pending",
    InReview => "in_review",
    Reviewed => "reviewed",
    Escalated => "escalated",
    Training => "training",
});

// Rank order: critical sorts first under ascending.
str_enum!(Priority {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

str_enum!(IssueSeverity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

str_enum!(ErrorCategory {
    Hallucination => "hallucination",
    Inaccuracy => "inaccuracy",
    Empathy => "empathy",
    Protocol => "protocol",
});

str_enum!(CaseStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Trained => "trained",
});

str_enum!(ReviewDecision {
    Approved => "approved",
    Rejected => "rejected",
});

str_enum!(BatchStatus {
    Draft => "draft",
    Ready => "ready",
    Training => "training",
    Completed => "completed",
    Failed => "failed",
});

str_enum!(MessageRole {
    User => "user",
    Assistant => "assistant",
    System => "system",
});

str_enum!(SortField {
    CreatedAt => "created_at",
    Score => "score",
    Priority => "priority",
    Status => "status",
    Service => "service",
    RiskScore => "risk_score",
});

str_enum!(SortDirection {
    Ascending => "asc",
    Descending => "desc",
});

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

impl CaseStatus {
    /// Terminal for this engine: no transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Trained)
    }
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Draft, ready and training batches still hold a claim on their cases.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}
