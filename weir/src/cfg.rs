//! Channel configuration.

/// Default high-water mark in bytes.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16384;

/// Default high-water mark in objects when running in object mode.
pub const DEFAULT_OBJECT_HIGH_WATER_MARK: usize = 16;

/// Text encoding applied to chunks pushed into a readable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Encoding {
    /// UTF-8; incomplete sequences are held back until the next chunk.
    Utf8,
    /// ISO-8859-1; every byte maps to one character, re-encoded as UTF-8.
    Latin1,
}

/// Channel configuration.
///
/// In most cases the default configuration ([Cfg::default]) is fine and should be used.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cfg {
    /// Buffered length above which backpressure is signalled.
    ///
    /// Measured in bytes, or in chunks when [object_mode](Self::object_mode) is enabled.
    /// By default this is 16384 bytes or 16 objects.
    pub high_water_mark: Option<usize>,
    /// Account every chunk as one unit regardless of its byte size.
    ///
    /// By default this is false.
    pub object_mode: bool,
    /// Keep the other side of a duplex channel open when one side ends.
    ///
    /// Only used by [Duplex](crate::Duplex).
    /// By default this is true.
    pub allow_half_open: bool,
    /// Decode pushed bytes as text before buffering.
    ///
    /// Only used by readable channels in sized mode.
    /// By default no decoding takes place.
    pub encoding: Option<Encoding>,
    /// Destroy the channel automatically once it has ended or finished.
    ///
    /// By default this is true.
    pub auto_destroy: bool,
    /// Emit the `close` notification after the channel was destroyed.
    ///
    /// By default this is true.
    pub emit_close: bool,
    #[doc(hidden)]
    #[cfg_attr(feature = "serde", serde(skip))]
    pub _non_exhaustive: (),
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            high_water_mark: None,
            object_mode: false,
            allow_half_open: true,
            encoding: None,
            auto_destroy: true,
            emit_close: true,
            _non_exhaustive: (),
        }
    }
}

impl Cfg {
    /// Configuration for a channel in object mode.
    pub fn object() -> Self {
        Self { object_mode: true, ..Default::default() }
    }

    /// Sets the high-water mark.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    /// The effective high-water mark.
    pub fn effective_high_water_mark(&self) -> usize {
        match self.high_water_mark {
            Some(hwm) => hwm,
            None if self.object_mode => DEFAULT_OBJECT_HIGH_WATER_MARK,
            None => DEFAULT_HIGH_WATER_MARK,
        }
    }

    /// Checks the configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid.
    pub(crate) fn check(&self) {
        if self.effective_high_water_mark() > MAX_HIGH_WATER_MARK {
            panic!("high-water mark must not exceed 1 GiB");
        }

        if self.object_mode && self.encoding.is_some() {
            panic!("encoding cannot be used in object mode");
        }
    }
}

/// Largest high-water mark a readable channel may grow to.
pub(crate) const MAX_HIGH_WATER_MARK: usize = 0x4000_0000;

/// Configuration of both sides of a duplex channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DuplexCfg {
    /// Configuration of the readable side.
    pub readable: Cfg,
    /// Configuration of the writable side.
    pub writable: Cfg,
    /// Keep the writable side open after the readable side ended and vice versa.
    ///
    /// When false, ending the readable side ends the writable side and destroying
    /// one side destroys the other.
    pub allow_half_open: bool,
}

impl Default for DuplexCfg {
    fn default() -> Self {
        Cfg::default().into()
    }
}

impl From<Cfg> for DuplexCfg {
    fn from(cfg: Cfg) -> Self {
        let allow_half_open = cfg.allow_half_open;
        let writable = Cfg { encoding: None, ..cfg.clone() };
        Self { readable: cfg, writable, allow_half_open }
    }
}
