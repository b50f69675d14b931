use std::{fmt, str::FromStr, time::Duration};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Time-derived quiz identifier (milliseconds since the Unix epoch at creation).
pub type QuizId = u64;

/// Name of the classroom whose current-quiz pointer is used when none is given.
pub const DEFAULT_CLASSROOM: &str = "default";
const CLASSROOM_MAX_LEN: usize = 64;

/// Scope of a current-quiz pointer: one teacher advertises one quiz per classroom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassroomId(String);

/// Error returned when a classroom identifier contains unsupported characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("classroom id must be 1-{CLASSROOM_MAX_LEN} characters of [A-Za-z0-9_-], got `{0}`")]
pub struct InvalidClassroom(pub String);

impl ClassroomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_CLASSROOM
    }
}

impl Default for ClassroomId {
    fn default() -> Self {
        Self(DEFAULT_CLASSROOM.to_string())
    }
}

impl FromStr for ClassroomId {
    type Err = InvalidClassroom;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= CLASSROOM_MAX_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidClassroom(raw.to_string()))
        }
    }
}

impl fmt::Display for ClassroomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a quiz still accepts votes, as seen at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Live,
    /// The creator ended the quiz (or expiry was reconciled into the record).
    Ended,
    /// The deadline passed but the record still says active.
    Expired,
}

/// Reasons a vote is refused by [`Quiz::record_vote`], in the order they are checked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteRejection {
    #[error("quiz is closed")]
    Closed,
    #[error("voter already voted")]
    AlreadyVoted,
    #[error("option {index} out of range (quiz has {available} options)")]
    InvalidOption { index: usize, available: usize },
}

/// One poll with its options, tallies and voters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    pub id: QuizId,
    pub title: String,
    pub description: String,
    /// Distinct, non-empty answer options.
    pub options: Vec<String>,
    /// `votes[i]` is the tally for `options[i]`.
    pub votes: Vec<u64>,
    /// Identities that already voted, in voting order.
    pub voters: IndexSet<String>,
    /// How long the quiz stays open after `created_at`.
    pub duration: Duration,
    pub created_at: OffsetDateTime,
    pub is_active: bool,
    pub creator: String,
    pub classroom: ClassroomId,
    /// Bumped on every mutation; orders copies of the same quiz.
    pub version: u64,
}

impl Quiz {
    /// Instant after which no vote is accepted, `None` when it falls outside
    /// the representable calendar range.
    pub fn checked_expires_at(&self) -> Option<OffsetDateTime> {
        let window = time::Duration::try_from(self.duration).ok()?;
        self.created_at.checked_add(window)
    }

    /// Instant after which no vote is accepted, clamped to the calendar range.
    pub fn expires_at(&self) -> OffsetDateTime {
        let window = time::Duration::try_from(self.duration).unwrap_or(time::Duration::MAX);
        self.created_at.saturating_add(window)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at()
    }

    /// Single authority on whether votes are accepted: the record must be
    /// active and the deadline must not have passed.
    pub fn is_open(&self, now: OffsetDateTime) -> bool {
        self.is_active && !self.is_expired(now)
    }

    pub fn status(&self, now: OffsetDateTime) -> QuizStatus {
        if !self.is_active {
            QuizStatus::Ended
        } else if self.is_expired(now) {
            QuizStatus::Expired
        } else {
            QuizStatus::Live
        }
    }

    /// Voting time left, saturating at zero.
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        let left = self.expires_at() - now;
        if left.is_positive() {
            left.unsigned_abs()
        } else {
            Duration::ZERO
        }
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.voters.contains(voter)
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.iter().sum()
    }

    /// Index of the first option holding the highest tally, `None` while nobody voted.
    pub fn winning_option(&self) -> Option<usize> {
        if self.total_votes() == 0 {
            return None;
        }
        let max = self.votes.iter().copied().max()?;
        self.votes.iter().position(|&count| count == max)
    }

    /// Whether more than one option shares the highest tally.
    pub fn is_tie(&self) -> bool {
        match self.winning_option() {
            Some(winner) => {
                let max = self.votes[winner];
                self.votes.iter().filter(|&&count| count == max).count() > 1
            }
            None => false,
        }
    }

    /// Count one vote from `voter` for `option_index`.
    ///
    /// The quiz is left untouched when the vote is rejected.
    pub fn record_vote(
        &mut self,
        option_index: usize,
        voter: &str,
        now: OffsetDateTime,
    ) -> Result<(), VoteRejection> {
        if !self.is_open(now) {
            return Err(VoteRejection::Closed);
        }
        if self.has_voted(voter) {
            return Err(VoteRejection::AlreadyVoted);
        }
        let Some(tally) = self.votes.get_mut(option_index) else {
            return Err(VoteRejection::InvalidOption {
                index: option_index,
                available: self.options.len(),
            });
        };

        *tally += 1;
        self.voters.insert(voter.to_string());
        self.version += 1;
        Ok(())
    }

    /// Stop accepting votes. Returns `false` when the quiz was already closed.
    pub fn close(&mut self) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.version += 1;
        true
    }

    /// Check the structural invariants a persisted record must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.votes.len() != self.options.len() {
            return Err(format!(
                "{} tallies for {} options",
                self.votes.len(),
                self.options.len()
            ));
        }
        let total = self.total_votes();
        if total != self.voters.len() as u64 {
            return Err(format!(
                "{total} votes counted for {} voters",
                self.voters.len()
            ));
        }
        if self.checked_expires_at().is_none() {
            return Err(format!(
                "deadline of a {}s window starting {} is out of range",
                self.duration.as_secs(),
                self.created_at
            ));
        }
        Ok(())
    }
}
