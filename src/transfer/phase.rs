//! Transfer phase definitions
//!
//! Phase IDs are stored as SMALLINT in PostgreSQL. The forward sequence
//! advances monotonically until COMPLETED or the compensation path begins.

use std::fmt;

/// Transfer sub-state
///
/// Forward: INITIATED -> VALIDATION_COMPLETE -> FUNDS_RESERVED ->
/// DEBIT_COMPLETE -> CREDIT_COMPLETE -> COMPLETED.
/// Unwind: COMPENSATION_PENDING -> COMPENSATED. FAILED is the
/// no-compensation terminal (validation never moved funds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferPhase {
    Initiated = 0,
    ValidationComplete = 10,
    FundsReserved = 20,
    DebitComplete = 30,
    CreditComplete = 40,
    Completed = 50,
    CompensationPending = -10,
    Compensated = -20,
    Failed = -30,
}

impl TransferPhase {
    /// Terminal phases admit no further transition
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferPhase::Completed | TransferPhase::Compensated | TransferPhase::Failed
        )
    }

    /// Funds are in flight once the source debit commits and until the
    /// transfer completes or compensation finishes
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferPhase::DebitComplete
                | TransferPhase::CreditComplete
                | TransferPhase::CompensationPending
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferPhase::Initiated),
            10 => Some(TransferPhase::ValidationComplete),
            20 => Some(TransferPhase::FundsReserved),
            30 => Some(TransferPhase::DebitComplete),
            40 => Some(TransferPhase::CreditComplete),
            50 => Some(TransferPhase::Completed),
            -10 => Some(TransferPhase::CompensationPending),
            -20 => Some(TransferPhase::Compensated),
            -30 => Some(TransferPhase::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Initiated => "INITIATED",
            TransferPhase::ValidationComplete => "VALIDATION_COMPLETE",
            TransferPhase::FundsReserved => "FUNDS_RESERVED",
            TransferPhase::DebitComplete => "DEBIT_COMPLETE",
            TransferPhase::CreditComplete => "CREDIT_COMPLETE",
            TransferPhase::Completed => "COMPLETED",
            TransferPhase::CompensationPending => "COMPENSATION_PENDING",
            TransferPhase::Compensated => "COMPENSATED",
            TransferPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferPhase {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferPhase::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransferPhase; 9] = [
        TransferPhase::Initiated,
        TransferPhase::ValidationComplete,
        TransferPhase::FundsReserved,
        TransferPhase::DebitComplete,
        TransferPhase::CreditComplete,
        TransferPhase::Completed,
        TransferPhase::CompensationPending,
        TransferPhase::Compensated,
        TransferPhase::Failed,
    ];

    #[test]
    fn test_terminal_phases() {
        assert!(TransferPhase::Completed.is_terminal());
        assert!(TransferPhase::Compensated.is_terminal());
        assert!(TransferPhase::Failed.is_terminal());

        assert!(!TransferPhase::Initiated.is_terminal());
        assert!(!TransferPhase::DebitComplete.is_terminal());
        assert!(!TransferPhase::CompensationPending.is_terminal());
    }

    #[test]
    fn test_in_flight_phases() {
        assert!(TransferPhase::DebitComplete.is_in_flight());
        assert!(TransferPhase::CreditComplete.is_in_flight());
        assert!(TransferPhase::CompensationPending.is_in_flight());

        assert!(!TransferPhase::Initiated.is_in_flight());
        assert!(!TransferPhase::Completed.is_in_flight());
        assert!(!TransferPhase::Compensated.is_in_flight());
    }

    #[test]
    fn test_phase_id_roundtrip() {
        for phase in ALL {
            assert_eq!(TransferPhase::from_id(phase.id()), Some(phase));
        }
        assert!(TransferPhase::from_id(999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferPhase::Initiated.to_string(), "INITIATED");
        assert_eq!(TransferPhase::Completed.to_string(), "COMPLETED");
        assert_eq!(
            TransferPhase::CompensationPending.to_string(),
            "COMPENSATION_PENDING"
        );
    }
}
