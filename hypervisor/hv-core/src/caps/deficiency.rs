use core::fmt;
use thiserror::Error;

/// One failed item of the platform checklist.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum Deficiency {
    #[error("x2APIC not supported")]
    X2Apic,
    #[error("long mode not supported")]
    LongMode,
    #[error("physical/virtual address widths not reported")]
    AddressWidths,
    #[error("TSC deadline timer not supported")]
    TscDeadline,
    #[error("execute-disable not supported")]
    NoExecute,
    #[error("SMEP not supported")]
    Smep,
    #[error("SMAP not supported")]
    Smap,
    #[error("MTRR not supported")]
    Mtrr,
    #[error("1 GiB pages not supported")]
    Page1Gb,
    #[error("VMX not supported")]
    Vmx,
    #[error("unrestricted guest not supported")]
    UnrestrictedGuest,
    #[error("EPT not supported")]
    Ept,
    #[error("maximum basic CPUID leaf {found:#x} below {required:#x}")]
    CpuidLevel { found: u32, required: u32 },
    #[error("VMX disabled and locked in IA32_FEATURE_CONTROL")]
    VmxLockedOff,
    #[error("{found} cores detected, at most {max} supported")]
    TooManyCores { found: usize, max: usize },
    #[error("INVEPT not supported")]
    Invept,
    #[error("INVVPID single-context and all-context not supported")]
    Invvpid,
    #[error("EPT 1 GiB pages not supported")]
    Ept1GbPage,
}

/// Every checklist item has its own variant, so this many fit.
pub const MAX_DEFICIENCIES: usize = 18;

/// The failed checklist items, in checklist order.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Deficiencies {
    items: [Option<Deficiency>; MAX_DEFICIENCIES],
    len: usize,
}

impl Deficiencies {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: [None; MAX_DEFICIENCIES],
            len: 0,
        }
    }

    /// Records `item`; a full list keeps its first entries.
    pub fn push(&mut self, item: Deficiency) {
        if let Some(slot) = self.items.get_mut(self.len) {
            *slot = Some(item);
            self.len += 1;
        }
    }

    /// Records `item` when `ok` is false.
    pub fn require(&mut self, ok: bool, item: Deficiency) {
        if !ok {
            self.push(item);
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Deficiency> + '_ {
        self.items[..self.len].iter().flatten().copied()
    }

    #[must_use]
    pub fn contains(&self, item: &Deficiency) -> bool {
        self.iter().any(|d| d == *item)
    }

    /// `Ok(())` when nothing was recorded.
    ///
    /// # Errors
    /// Returns `self` if any item failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for Deficiencies {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deficiencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for Deficiencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl core::error::Error for Deficiencies {}
