//! Runtime options for the decoder.

/// What to do when one frame of a multi-frame packet fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the whole packet.
    Strict,
    /// Substitute silence for the failed frame and continue with the next one.
    #[default]
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
    pub error_policy: ErrorPolicy,
    /// Apply the output gain carried by the identification header.
    pub apply_output_gain: bool,
    /// Allow phase inverted intensity stereo in CELT frames.
    pub phase_inversion: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        return Self { error_policy: ErrorPolicy::Lenient, apply_output_gain: true, phase_inversion: true };
    }
}

impl DecoderConfig {
    /// The configuration selected through `symphonia_core::codecs::DecoderOptions`.
    pub fn from_options(options: &symphonia_core::codecs::DecoderOptions) -> Self {
        let error_policy = if options.verify { ErrorPolicy::Strict } else { ErrorPolicy::Lenient };
        return Self { error_policy, ..Self::default() };
    }

    pub fn is_strict(&self) -> bool {
        return self.error_policy == ErrorPolicy::Strict;
    }
}
