/// Anything the engine can hand to a target, such as a generated or mutated SQL statement.
///
/// Executors only ever look at the byte view; fuzzers work on the concrete type.
pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
}

impl Input for String {
    fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }
    /// Length in characters, which is the unit the mutation operators edit.
    fn len(&self) -> usize {
        self.chars().count()
    }
    fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_input_counts_characters_not_bytes() {
        let data = String::from("héllo");
        assert_eq!(Input::len(&data), 5);
        assert_eq!(Input::as_bytes(&data).len(), 6);
        assert!(!Input::is_empty(&data));
        assert!(Input::is_empty(&String::new()));
    }
}
