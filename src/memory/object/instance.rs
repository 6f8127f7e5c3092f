use super::Class;
use crate::memory::{Handle, Table};
use std::cell::RefCell;
use std::fmt;

/// An instance of a class. Owns its own copy of the class field template.
pub struct Instance {
    pub class: Handle<Class>,
    pub fields: RefCell<Table>,
}

impl Instance {
    pub fn new(class: Handle<Class>, fields: Table) -> Self {
        Self {
            class,
            fields: RefCell::new(fields),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Instance {{ class: {}, fields: {} }}",
            self.class.name,
            self.fields.borrow().len()
        )
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.class.name)
    }
}
