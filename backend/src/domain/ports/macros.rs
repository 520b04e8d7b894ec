//! Helper macro for declaring port error enums.
//!
//! Each variant gets a `thiserror` message and a snake_case constructor whose
//! parameters accept anything convertible into the field type.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    define_port_error! {
        pub enum LedgerProbeError {
            Unavailable => "ledger unavailable",
            Query { message: String } => "ledger query failed: {message}",
            Short { requested: u64 } => "short by {requested}",
            Refused { message: String, attempts: u32 } => "refused: {message} after {attempts}",
        }
    }

    #[test]
    fn unit_variants_get_constructors() {
        assert_eq!(LedgerProbeError::unavailable().to_string(), "ledger unavailable");
    }

    #[test]
    fn constructors_accept_str_for_string_fields() {
        let err = LedgerProbeError::query("timeout");
        assert_eq!(err.to_string(), "ledger query failed: timeout");
    }

    #[test]
    fn constructors_convert_numeric_fields() {
        let err = LedgerProbeError::short(42_u32);
        assert_eq!(err.to_string(), "short by 42");
    }

    #[test]
    fn constructors_support_mixed_fields() {
        let err = LedgerProbeError::refused("busy", 3_u32);
        assert_eq!(err.to_string(), "refused: busy after 3");
    }
}
