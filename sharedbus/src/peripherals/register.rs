//! Typed access to a single register of a register bank

use super::{
    with_transport,
    Error,
};
use crate::{
    core::Register,
    transport::{
        Deserialize,
        Serialize,
        Transport,
    },
};
use sharedbus_utils::manifest::{
    Access,
    Manifest,
    Side,
};
use std::{
    marker::PhantomData,
    sync::{
        Mutex,
        Weak,
    },
};

/// A register holding a `V`, honouring the register's width and access discipline
#[derive(Debug)]
pub struct SoftwareRegister<T, V> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    register: Register,
    value: PhantomData<V>,
}

impl<T, V> SoftwareRegister<T, V>
where
    T: Transport,
    V: Serialize + Deserialize,
{
    /// Resolve `region.name` from the manifest, accessed from `side`
    /// # Errors
    /// Returns an error if the manifest doesn't contain the register
    pub fn new(
        transport: Weak<Mutex<T>>,
        manifest: &Manifest,
        region: &str,
        name: &str,
        side: Side,
    ) -> Result<Self, Error> {
        Ok(Self {
            transport,
            register: Register::resolve(manifest, region, name)?.on_side(side),
            value: PhantomData,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.register.name
    }

    #[must_use]
    pub fn access(&self) -> Access {
        self.register.access
    }

    /// # Errors
    /// Returns an error on bad transport or an invalid encoding
    pub fn read(&self) -> Result<V, Error> {
        with_transport(&self.transport, |t| {
            Ok(V::deserialize(self.register.get(t)?)?)
        })
    }

    /// # Errors
    /// Returns an error on access violations, bad transport or if the value can't be packed
    pub fn write(&self, value: &V) -> Result<(), Error> {
        let word = value.serialize()?;
        with_transport(&self.transport, |t| Ok(self.register.set(t, word)?))
    }
}
