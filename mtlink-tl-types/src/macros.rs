/// Declares a schema constructor with a fixed field list.
///
/// The generated `Serializable` impl writes the boxed form (constructor ID
/// followed by the fields) and `Deserializable` reads it back, rejecting any
/// other constructor.
macro_rules! tl_object {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                $crate::Serializable::serialize(&<Self as $crate::Identifiable>::CONSTRUCTOR_ID, buf);
                $( $crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                $crate::deserialize::expect_id(buf, <Self as $crate::Identifiable>::CONSTRUCTOR_ID)?;
                Ok(Self { $( $field: <$ty as $crate::Deserializable>::deserialize(buf)?, )* })
            }
        }
    };
}
