//! Channel copy - duplicates one channel onto another

use super::{ChainOperator, OperatorBase, OperatorInfo, ParamValue, ParameterDescriptor};
use crate::buffer::SampleBuffer;

/// Highest channel number the operator accepts
const MAX_CHANNEL: ParamValue = 64.0;

/// Copies channel `from-channel` onto `to-channel` (both 1-based)
///
/// Copying beyond the last input channel widens the buffer, so a mono
/// stream becomes stereo with `chcopy 1,2`. Channels created in between
/// are silent.
pub struct ChannelCopy {
    base: OperatorBase,
}

impl ChannelCopy {
    pub fn new(from: usize, to: usize) -> Self {
        let info = OperatorInfo::new("Channel copy", "chcopy")
            .with_param(
                ParameterDescriptor::new("from-channel", 1.0)
                    .with_bounds(1.0, MAX_CHANNEL)
                    .integer(),
            )
            .with_param(
                ParameterDescriptor::new("to-channel", 2.0)
                    .with_bounds(1.0, MAX_CHANNEL)
                    .integer(),
            );
        let mut base = OperatorBase::new(info);
        base.set(0, from as ParamValue);
        base.set(1, to as ParamValue);
        Self { base }
    }

    fn from(&self) -> usize {
        self.base.get(0) as usize - 1
    }

    fn to(&self) -> usize {
        self.base.get(1) as usize - 1
    }
}

impl Default for ChannelCopy {
    fn default() -> Self {
        Self::new(1, 2)
    }
}

impl ChainOperator for ChannelCopy {
    fn info(&self) -> &OperatorInfo {
        self.base.info()
    }

    fn process(&mut self, buffer: &mut SampleBuffer) {
        let (from, to) = (self.from(), self.to());
        let input = buffer.channel_count();
        if from >= input || from == to {
            return;
        }
        if to >= input {
            buffer.set_channel_count(to + 1);
            for ch in input..to {
                buffer.channel_mut(ch).fill(0.0);
            }
        }
        buffer.copy_channel(from, to);
    }

    fn set_parameter(&mut self, index: usize, value: ParamValue) {
        self.base.set(index, value);
    }

    fn get_parameter(&self, index: usize) -> ParamValue {
        self.base.get(index)
    }

    fn output_channels(&self, input: usize) -> usize {
        input.max(self.to() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo() {
        let op = ChannelCopy::new(1, 2);
        assert_eq!(op.output_channels(1), 2);
        assert_eq!(op.output_channels(4), 4);

        let mut op = op;
        let mut buf = SampleBuffer::from_channels(&[&[0.1, 0.2, 0.3]], 44100);
        op.process(&mut buf);
        assert_eq!(buf.channel_count(), 2);
        assert_eq!(buf.channel(1), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_gap_channels_are_silent() {
        let mut op = ChannelCopy::new(1, 4);
        let mut buf = SampleBuffer::from_channels(&[&[0.5, 0.5]], 44100);
        op.process(&mut buf);
        assert_eq!(buf.channel_count(), 4);
        assert_eq!(buf.channel(1), &[0.0, 0.0]);
        assert_eq!(buf.channel(2), &[0.0, 0.0]);
        assert_eq!(buf.channel(3), &[0.5, 0.5]);
    }

    #[test]
    fn test_copy_downwards() {
        let mut op = ChannelCopy::new(2, 1);
        let mut buf = SampleBuffer::from_channels(&[&[0.0], &[0.9]], 44100);
        op.process(&mut buf);
        assert_eq!(buf.channel(0), &[0.9]);
    }

    #[test]
    fn test_missing_source_channel_is_noop() {
        let mut op = ChannelCopy::new(3, 1);
        let mut buf = SampleBuffer::from_channels(&[&[0.2], &[0.4]], 44100);
        op.process(&mut buf);
        assert_eq!(buf.channel(0), &[0.2]);
        assert_eq!(buf.channel_count(), 2);
    }
}
