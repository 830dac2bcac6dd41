//! Macros for declaring borrowed projections of [`DesignState`](crate::DesignState).

/// Declare a struct that borrows a fixed subset of `DesignState` fields and
/// serializes them in declaration order.
///
/// The equality gates compare designs by the canonical JSON of such a
/// projection, so the field list *is* the definition of "the same".
///
/// # Example
///
/// ```ignore
/// design_projection! {
///     /// Fields that identify a recompute.
///     RecomputeFields {
///         main_path: String,
///         vtree_mode: bool,
///     }
/// }
///
/// let fields = RecomputeFields::of(&design);
/// ```
#[macro_export]
macro_rules! design_projection {
    ($(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name<'a> {
            $(pub $field: &'a $ty,)+
        }

        impl<'a> $name<'a> {
            pub fn of(design: &'a $crate::DesignState) -> Self {
                Self {
                    $($field: &design.$field,)+
                }
            }
        }
    };
}
