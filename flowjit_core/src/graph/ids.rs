use std::fmt;

macro_rules! graph_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

graph_id!(
    /// Identity of a node, stable for its whole life
    NodeId,
    "n"
);
graph_id!(ControlId, "c");
graph_id!(GroupId, "g");
graph_id!(SurfaceId, "s");

impl NodeId {
    /// Name of the compiled unit this node produces
    pub fn unit_name(&self) -> String {
        self.to_string()
    }
}

impl GroupId {
    /// Name of the runtime-state block carrying this group's active slots
    pub fn state_name(&self) -> String {
        self.to_string()
    }
}

/// Hands out ids; one counter for every kind so ids are never reused
#[derive(Debug)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdAllocator {
    fn bump(&mut self) -> u64 {
        let raw = self.next;
        self.next += 1;
        raw
    }

    pub fn node(&mut self) -> NodeId {
        NodeId::new(self.bump())
    }

    pub fn control(&mut self) -> ControlId {
        ControlId::new(self.bump())
    }

    pub fn group(&mut self) -> GroupId {
        GroupId::new(self.bump())
    }

    pub fn surface(&mut self) -> SurfaceId {
        SurfaceId::new(self.bump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut ids = IdAllocator::default();
        let node = ids.node();
        let group = ids.group();
        assert_ne!(node.raw(), group.raw());
        assert_eq!(node.unit_name(), format!("n{}", node.raw()));
        assert_eq!(group.state_name(), format!("g{}", group.raw()));
        assert_eq!(ids.surface().to_string(), "s3");
    }
}
