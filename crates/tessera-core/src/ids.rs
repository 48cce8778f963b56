//! Snippet identities.

/// Which sequence a new snippet id is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    Main,
    Startup,
    Rejected,
}

/// Assigns snippet ids. Pluggable so embedders can choose their own scheme.
pub trait IdGenerator: Send {
    fn next_id(&mut self, space: IdSpace) -> String;
}

/// `1, 2, …` for accepted snippets, `s1, …` for startup snippets and
/// `e1, …` for rejected ones.
#[derive(Debug, Default)]
pub struct SequentialIds {
    main: u32,
    startup: u32,
    rejected: u32,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self, space: IdSpace) -> String {
        let (counter, prefix) = match space {
            IdSpace::Main => (&mut self.main, ""),
            IdSpace::Startup => (&mut self.startup, "s"),
            IdSpace::Rejected => (&mut self.rejected, "e"),
        };
        *counter += 1;
        format!("{prefix}{counter}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_independent() {
        let mut ids = SequentialIds::new();
        assert_eq!(ids.next_id(IdSpace::Main), "1");
        assert_eq!(ids.next_id(IdSpace::Rejected), "e1");
        assert_eq!(ids.next_id(IdSpace::Main), "2");
        assert_eq!(ids.next_id(IdSpace::Startup), "s1");
    }
}
