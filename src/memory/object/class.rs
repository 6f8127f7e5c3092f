use super::{Closure, Key};
use crate::memory::{Handle, Table};
use std::cell::RefCell;
use std::fmt;

/// A class declaration containing the name, its methods and the field
/// template every instance starts from.
pub struct Class {
    /// Name of the class.
    pub name: Handle<Key>,

    /// The `init` method, run when the class is called.
    pub initializer: RefCell<Option<Handle<Closure>>>,

    /// Methods this class contains. Only written while the class body runs.
    pub methods: RefCell<Table>,

    /// Field defaults, copied into each new instance.
    pub fields: RefCell<Table>,
}

impl Class {
    pub fn new(name: Handle<Key>, methods: Table, fields: Table) -> Self {
        Class {
            name,
            initializer: RefCell::new(None),
            methods: RefCell::new(methods),
            fields: RefCell::new(fields),
        }
    }

    pub fn method(&self, name: &Handle<Key>) -> Option<Handle<Closure>> {
        self.methods.borrow().get(name).and_then(|method| method.as_closure())
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Class {{ name: {}, methods: {}, fields: {} }}",
            self.name,
            self.methods.borrow().len(),
            self.fields.borrow().len()
        )
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}
