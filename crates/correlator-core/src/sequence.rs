use crate::{message::Message, types::Payload};

/// Outcome of checking a message's sequence headers on their own.
///
/// Consistency with an existing group's sequence size is checked
/// later by the handler, under the group's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Accept,
    RejectMalformed,
}

/// Checks that `1 <= sequence_number <= sequence_size` holds for
/// whichever of the two headers are present. A sequence size without a
/// sequence number gives no position and is malformed too.
pub fn validate<T>(message: &Message<T>) -> Validation
where
    T: Payload,
{
    let number = message.sequence_number();
    let size = message.sequence_size();

    let malformed = number == Some(0)
        || size == Some(0)
        || match (number, size) {
            (Some(number), Some(size)) => number > size,
            (None, Some(_)) => true,
            _ => false,
        };

    if malformed {
        Validation::RejectMalformed
    } else {
        Validation::Accept
    }
}
