/// The CPUID output registers recorded in the detector's feature table.
///
/// The discriminant is the index into a `[u32; FEATURE_WORDS]` table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FeatureWord {
    /// CPUID.01H:ECX
    Leaf1Ecx = 0,
    /// CPUID.01H:EDX
    Leaf1Edx = 1,
    /// CPUID.(EAX=07H,ECX=0):EBX
    Leaf7Ebx = 2,
    /// CPUID.(EAX=07H,ECX=0):ECX
    Leaf7Ecx = 3,
    /// CPUID.(EAX=07H,ECX=0):EDX
    Leaf7Edx = 4,
    /// CPUID.80000001H:ECX
    Ext1Ecx = 5,
    /// CPUID.80000001H:EDX
    Ext1Edx = 6,
    /// CPUID.80000008H:EBX
    Ext8Ebx = 7,
}

pub const FEATURE_WORDS: usize = 8;

/// One of the four CPUID output registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CpuidRegister {
    Eax,
    Ebx,
    Ecx,
    Edx,
}

impl FeatureWord {
    pub const ALL: [Self; FEATURE_WORDS] = [
        Self::Leaf1Ecx,
        Self::Leaf1Edx,
        Self::Leaf7Ebx,
        Self::Leaf7Ecx,
        Self::Leaf7Edx,
        Self::Ext1Ecx,
        Self::Ext1Edx,
        Self::Ext8Ebx,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Leaf, subleaf and output register this word is read from.
    #[must_use]
    pub const fn source(self) -> (u32, u32, CpuidRegister) {
        match self {
            Self::Leaf1Ecx => (crate::LEAF_FEATURES, 0, CpuidRegister::Ecx),
            Self::Leaf1Edx => (crate::LEAF_FEATURES, 0, CpuidRegister::Edx),
            Self::Leaf7Ebx => (crate::LEAF_EXTENDED_FEATURES, 0, CpuidRegister::Ebx),
            Self::Leaf7Ecx => (crate::LEAF_EXTENDED_FEATURES, 0, CpuidRegister::Ecx),
            Self::Leaf7Edx => (crate::LEAF_EXTENDED_FEATURES, 0, CpuidRegister::Edx),
            Self::Ext1Ecx => (crate::LEAF_EXTENDED_FUNCTION_1, 0, CpuidRegister::Ecx),
            Self::Ext1Edx => (crate::LEAF_EXTENDED_FUNCTION_1, 0, CpuidRegister::Edx),
            Self::Ext8Ebx => (crate::LEAF_ADDRESS_SIZE, 0, CpuidRegister::Ebx),
        }
    }
}

/// One feature bit: a (word, bit) coordinate into the feature table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Feature {
    pub word: FeatureWord,
    pub bit: u8,
}

impl Feature {
    #[must_use]
    pub const fn new(word: FeatureWord, bit: u8) -> Self {
        debug_assert!(bit < 32);
        Self { word, bit }
    }

    #[inline]
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self.bit
    }

    /// Whether this bit is set in a feature table.
    #[inline]
    #[must_use]
    pub const fn is_set_in(self, words: &[u32; FEATURE_WORDS]) -> bool {
        words[self.word.index()] & self.mask() != 0
    }

    pub const MONITOR: Self = Self::new(FeatureWord::Leaf1Ecx, 3);
    pub const VMX: Self = Self::new(FeatureWord::Leaf1Ecx, 5);
    pub const X2APIC: Self = Self::new(FeatureWord::Leaf1Ecx, 21);
    pub const TSC_DEADLINE: Self = Self::new(FeatureWord::Leaf1Ecx, 24);
    pub const XSAVE: Self = Self::new(FeatureWord::Leaf1Ecx, 26);
    pub const OSXSAVE: Self = Self::new(FeatureWord::Leaf1Ecx, 27);

    pub const MTRR: Self = Self::new(FeatureWord::Leaf1Edx, 12);

    pub const SMEP: Self = Self::new(FeatureWord::Leaf7Ebx, 7);
    pub const SMAP: Self = Self::new(FeatureWord::Leaf7Ebx, 20);

    /// IBRS and IBPB.
    pub const IBRS_IBPB: Self = Self::new(FeatureWord::Leaf7Edx, 26);
    pub const STIBP: Self = Self::new(FeatureWord::Leaf7Edx, 27);
    pub const L1D_FLUSH: Self = Self::new(FeatureWord::Leaf7Edx, 28);
    /// `IA32_ARCH_CAPABILITIES` is enumerated.
    pub const ARCH_CAP: Self = Self::new(FeatureWord::Leaf7Edx, 29);

    /// Execute-disable.
    pub const NX: Self = Self::new(FeatureWord::Ext1Edx, 20);
    pub const PAGE1GB: Self = Self::new(FeatureWord::Ext1Edx, 26);
    /// Long mode.
    pub const LM: Self = Self::new(FeatureWord::Ext1Edx, 29);
}
