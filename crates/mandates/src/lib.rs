//! Mandates: long-lived offices with periodic review checkpoints.
//!
//! The tick engine scans active mandates for overdue checkpoints; completing
//! a review moves the next checkpoint forward by the review interval.

pub mod mandate;

pub use mandate::{
    CharterMandate, CompleteReview, Mandate, MandateChartered, MandateCommand, MandateEvent,
    MandateRetired, MandateStatus, RetireMandate, ReviewCompleted, SCOPE, STREAM_TYPE, mandate_stream,
};
