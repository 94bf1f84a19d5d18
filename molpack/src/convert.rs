pub fn f64_from_usize(x: usize) -> f64 {
    f64::from(u32::try_from(x).unwrap())
}

#[allow(clippy::cast_possible_truncation)]
pub fn i64_from_f64(x: f64) -> i64 {
    x as i64
}
