//! Process-wide cache of compiled dictionaries.
//!
//! Dictionary compilation is expensive and dictionaries are shared between
//! files, so compiled validators are cached by name behind a mutex. The
//! factory never opens files itself: callers register a resource loader,
//! a name-to-byte-stream hook that may consult search paths or embedded
//! blobs and transparently decompress.

use std::io::Read;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::text::iequals;
use crate::validate::{dictionary, Validator};

type ResourceLoader = Box<dyn Fn(&str) -> Option<Box<dyn Read>> + Send>;

#[derive(Default)]
struct Inner {
    validators: Vec<Arc<Validator>>,
    loader: Option<ResourceLoader>,
}

#[derive(Default)]
pub struct ValidatorFactory {
    inner: Mutex<Inner>,
}

impl ValidatorFactory {
    pub fn new() -> ValidatorFactory {
        ValidatorFactory::default()
    }

    /// The shared process-wide instance.
    pub fn global() -> &'static ValidatorFactory {
        static INSTANCE: OnceLock<ValidatorFactory> = OnceLock::new();
        INSTANCE.get_or_init(ValidatorFactory::new)
    }

    /// Register the resource loader consulted on cache misses.
    pub fn set_resource_loader(
        &self,
        loader: impl Fn(&str) -> Option<Box<dyn Read>> + Send + 'static,
    ) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.loader = Some(Box::new(loader));
        }
    }

    /// Look up a compiled dictionary by name, loading and compiling it on
    /// a miss. A name without the conventional `.dic` extension is also
    /// tried with it appended. Compilation happens inside the critical
    /// section; concurrent misses for the same rare load are accepted.
    pub fn get(&self, name: &str) -> Result<Arc<Validator>> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Dictionary("validator factory lock poisoned".into()))?;

        let with_dic = if name.ends_with(".dic") {
            None
        } else {
            Some(format!("{name}.dic"))
        };

        for v in &inner.validators {
            if iequals(v.name(), name)
                || with_dic.as_deref().is_some_and(|n| iequals(v.name(), n))
            {
                return Ok(v.clone());
            }
        }

        let Some(loader) = &inner.loader else {
            return Err(Error::Dictionary(format!(
                "dictionary {name} not found and no resource loader is registered"
            )));
        };
        let stream = loader(name)
            .or_else(|| with_dic.as_deref().and_then(|n| loader(n)))
            .ok_or_else(|| Error::Dictionary(format!("dictionary {name} not found")))?;

        let validator = Arc::new(dictionary::parse_dictionary(name, stream)?);
        inner.validators.push(validator.clone());
        Ok(validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINI: &str = "\
data_mini.dic
_dictionary.title   mini.dic
_dictionary.version 2.0
loop_
_item_type_list.code
_item_type_list.primitive_code
_item_type_list.construct
int numb '[+-]?[0-9]+'
";

    #[test]
    fn loads_through_the_registered_resource() {
        let factory = ValidatorFactory::new();
        factory.set_resource_loader(|name| {
            (name == "mini" || name == "mini.dic")
                .then(|| Box::new(MINI.as_bytes()) as Box<dyn Read>)
        });

        let v = factory.get("mini").unwrap();
        assert_eq!(v.name(), "mini.dic");
        assert_eq!(v.version(), "2.0");

        // second lookup is served from the cache under either spelling
        let again = factory.get("mini.dic").unwrap();
        assert!(Arc::ptr_eq(&v, &again));
    }

    #[test]
    fn missing_dictionary_is_an_error() {
        let factory = ValidatorFactory::new();
        factory.set_resource_loader(|_| None);
        assert!(factory.get("absent").is_err());
    }
}
