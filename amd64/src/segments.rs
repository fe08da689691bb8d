/// A segment selector
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug)]
pub struct Selector(pub u16);

impl Selector {
    pub const NULL: Selector = Selector(0);

    /// Selector for the GDT slot `index` requesting the given privilege level.
    pub const fn new(index: u16, rpl: Ring) -> Selector {
        Selector((index << 3) | rpl.0 as u16)
    }

    /// The descriptor table slot this selector refers to.
    pub fn index(&self) -> u16 {
        self.0 >> 3
    }
}

/// Privilege level
#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Debug)]
pub struct Ring(u8);

impl Ring {
    pub const RING0: Ring = Ring(0);
    pub const RING1: Ring = Ring(1);
    pub const RING2: Ring = Ring(2);
    pub const RING3: Ring = Ring(3);

    /// Create a new ring if the number is valid (i.e. in the range 0 (kernel mode) - 3 (user mode))
    pub fn new(ring: u8) -> Option<Ring> {
        if ring <= 3 {
            Some(Ring(ring))
        } else {
            None
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }
}
