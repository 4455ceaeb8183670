//! Property attribute flags.

bitflags::bitflags! {
    /// Property attributes and binding kinds.
    ///
    /// Attribute bits are negative (`NOT_*`) so that the empty set describes an
    /// ordinary writable, enumerable, configurable property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u16 {
        /// Value cannot be changed.
        const NOT_WRITABLE = 1 << 0;
        /// Skipped by key enumeration.
        const NOT_ENUMERABLE = 1 << 1;
        /// Cannot be deleted or have its attributes changed.
        const NOT_CONFIGURABLE = 1 << 2;
        /// Function parameter binding.
        const IS_PARAMETER = 1 << 3;
        /// Parameter of a function that uses `arguments`.
        const HAS_ARGUMENTS = 1 << 4;
        /// Binding created by a function declaration.
        const IS_FUNCTION_DECLARATION = 1 << 5;
        /// Installed by the runtime, not by script.
        const IS_BUILTIN = 1 << 6;
        /// Bound to a fixed scope object; its identity may serve as the guard.
        const IS_BOUND = 1 << 7;
        /// `let`/`const` binding not yet initialised.
        const NEEDS_DECLARATION = 1 << 8;
        /// Lexically scoped binding.
        const IS_LEXICAL_BINDING = 1 << 9;
        /// Stored in a dual (primitive + generic) layout.
        const DUAL_FIELDS = 1 << 10;
    }
}

impl PropertyFlags {
    /// Flags of a sealed property
    pub const SEALED: Self = Self::NOT_CONFIGURABLE;

    /// Flags of a frozen property
    pub const FROZEN: Self = Self::NOT_CONFIGURABLE.union(Self::NOT_WRITABLE);

    /// Flags of a `const` binding awaiting initialisation
    pub const CONST_DECLARATION: Self = Self::NOT_WRITABLE
        .union(Self::NEEDS_DECLARATION)
        .union(Self::IS_LEXICAL_BINDING);

    /// Flags of a `let` binding awaiting initialisation
    pub const LET_DECLARATION: Self = Self::NEEDS_DECLARATION.union(Self::IS_LEXICAL_BINDING);
}
