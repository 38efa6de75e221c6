/// Macro to implement `From<T>` for newtype wrappers around primitive types.
#[macro_export]
macro_rules! impl_from_primitive {
    ($wrapper:ident, $primitive:ty) => {
        impl From<$primitive> for $wrapper {
            fn from(value: $primitive) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for $primitive {
            fn from(wrapper: $wrapper) -> Self {
                wrapper.0
            }
        }
    };
}

/// Macro to implement `Display` for newtypes by forwarding to the wrapped value.
#[macro_export]
macro_rules! impl_display_inner {
    ($wrapper:ident) => {
        impl std::fmt::Display for $wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

/// Macro to implement `From<&str>` and `From<String>` for string-backed newtypes.
#[macro_export]
macro_rules! impl_from_str_like {
    ($wrapper:ident) => {
        impl From<&str> for $wrapper {
            fn from(value: &str) -> Self {
                Self(value.into())
            }
        }

        impl From<String> for $wrapper {
            fn from(value: String) -> Self {
                Self(value.into())
            }
        }
    };
}
