pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::Error::invalid_arg(name, condition))
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    fn check_alignment(alignment: usize) -> super::Result<()> {
        verify_arg!(alignment, alignment.is_power_of_two());
        Ok(())
    }

    #[test]
    fn test_verify_arg() {
        assert!(check_alignment(16).is_ok());
        let err = check_alignment(12).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidArgument { name, message } => {
                assert_eq!(name, "alignment");
                assert_eq!(message, "alignment.is_power_of_two()");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
