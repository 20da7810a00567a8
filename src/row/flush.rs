// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

/// Writer progress snapshot handed to the flush policy after every
/// batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct StripeProgress {
    /// Uncompressed bytes buffered or already chunked in the open
    /// stripe.
    pub raw_stripe_size: u64,
    pub stripe_row_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushDecision {
    None,
    /// Seal the buffered values of oversized fields into chunks but
    /// keep the stripe open.
    Chunk,
    /// Seal all buffers and emit the stripe.
    Stripe,
}

pub trait FlushPolicy: Send {
    fn should_flush(&mut self, progress: &StripeProgress) -> FlushDecision;

    fn on_close(&mut self) {}
}

/// Flush a stripe once its raw size crosses a threshold.
pub struct RawStripeSizeFlushPolicy {
    raw_stripe_size: u64,
}

impl RawStripeSizeFlushPolicy {
    pub fn new(raw_stripe_size: u64) -> Self {
        Self { raw_stripe_size }
    }
}

impl FlushPolicy for RawStripeSizeFlushPolicy {
    fn should_flush(&mut self, progress: &StripeProgress) -> FlushDecision {
        if progress.raw_stripe_size >= self.raw_stripe_size {
            FlushDecision::Stripe
        } else {
            FlushDecision::None
        }
    }
}

/// Externally supplied decision callback.
pub struct CallbackFlushPolicy {
    callback: Box<dyn FnMut(&StripeProgress) -> FlushDecision + Send>,
}

impl CallbackFlushPolicy {
    pub fn new(callback: impl FnMut(&StripeProgress) -> FlushDecision + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl FlushPolicy for CallbackFlushPolicy {
    fn should_flush(&mut self, progress: &StripeProgress) -> FlushDecision {
        (self.callback)(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_stripe_size_policy() {
        let mut policy = RawStripeSizeFlushPolicy::new(1024);
        assert_eq!(
            policy.should_flush(&StripeProgress {
                raw_stripe_size: 1023,
                stripe_row_count: 10,
            }),
            FlushDecision::None
        );
        assert_eq!(
            policy.should_flush(&StripeProgress {
                raw_stripe_size: 1024,
                stripe_row_count: 10,
            }),
            FlushDecision::Stripe
        );
    }

    #[test]
    fn test_callback_policy() {
        let mut policy =
            CallbackFlushPolicy::new(|progress| {
                if progress.stripe_row_count >= 5 {
                    FlushDecision::Stripe
                } else {
                    FlushDecision::Chunk
                }
            });
        assert_eq!(
            policy.should_flush(&StripeProgress {
                raw_stripe_size: 0,
                stripe_row_count: 4,
            }),
            FlushDecision::Chunk
        );
        assert_eq!(
            policy.should_flush(&StripeProgress {
                raw_stripe_size: 0,
                stripe_row_count: 5,
            }),
            FlushDecision::Stripe
        );
    }
}
