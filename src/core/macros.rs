//! 核心宏定义
//!
//! 配置结构体大多只是字段加默认值，用宏减少样板代码

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use granule_upsampler::impl_default;
///
/// struct PassTuning {
///     chunk_size: usize,
///     label: String,
/// }
///
/// impl_default!(PassTuning {
///     chunk_size: 1024,
///     label: String::from("spawn"),
/// });
///
/// assert_eq!(PassTuning::default().chunk_size, 1024);
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
