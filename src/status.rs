/// Outcome of an `enq`/`deq` call on [`crate::EncodeBuffer`] or [`crate::DecodeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call succeeded with nothing further to report.
    Ok,
    /// An `enq` completed a group: two parity frames were generated (encoder)
    /// or a group's data was pushed to the output queue (decoder).
    OkParityGenerated,
    /// A `deq` found nothing queued.
    NoElement,
}
