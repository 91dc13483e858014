//! Useful macros for describing SD Host Controller registers.

macro_rules! define_register {
    ($(#[$meta:meta])* $name:ident, $type:ty) => {
        $(#[$meta])*
        #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
        #[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
        pub struct $name(pub $type);

        impl From<$type> for $name {
            fn from(value: $type) -> $name {
                $name(value)
            }
        }

        impl From<$name> for $type {
            fn from(value: $name) -> $type {
                value.0
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, $type:ty, $offset:expr) => {
        define_register!($(#[$meta])* $name, $type);

        impl $name {
            /// Byte offset of this register within the register block
            pub const OFFSET: usize = $offset;

            /// Read this register, with a barrier before the access
            pub fn read<R: $crate::regs::Registers + ?Sized>(regs: &R) -> $name {
                $name(<$type as $crate::regs::RegisterValue>::read(regs, $offset))
            }

            /// Read this register without a barrier
            pub fn read_nofence<R: $crate::regs::Registers + ?Sized>(regs: &R) -> $name {
                $name(<$type as $crate::regs::RegisterValue>::read_nofence(regs, $offset))
            }

            /// Write this register, with a barrier before the access
            pub fn write<R: $crate::regs::Registers + ?Sized>(self, regs: &R) {
                <$type as $crate::regs::RegisterValue>::write(self.0, regs, $offset)
            }

            /// Write this register without a barrier
            pub fn write_nofence<R: $crate::regs::Registers + ?Sized>(self, regs: &R) {
                <$type as $crate::regs::RegisterValue>::write_nofence(self.0, regs, $offset)
            }
        }
    };
}

macro_rules! define_field {
    ($name:ident, $setter:ident, $reg:ty, bool, $bit:expr) => {
        /// Get the value from the $name field
        pub fn $name(&self) -> bool {
            (self.0 >> $bit) & 1 != 0
        }

        /// Set the value of the $name field
        pub fn $setter(&mut self, value: bool) -> &mut Self {
            self.0 = (self.0 & !(1 << $bit)) | ((value as $reg) << $bit);
            self
        }
    };
    ($name:ident, $setter:ident, $reg:ty, $type:ty, $start_bit:expr, $num_bits:expr) => {
        /// Get the value from the $name field
        pub fn $name(&self) -> $type {
            ((self.0 >> $start_bit) & ((1 << $num_bits) - 1)) as $type
        }

        /// Set the value of the $name field
        pub fn $setter(&mut self, value: $type) -> &mut Self {
            let mask: $reg = ((1 << $num_bits) - 1) << $start_bit;
            self.0 = (self.0 & !mask) | (((value as $reg) << $start_bit) & mask);
            self
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
