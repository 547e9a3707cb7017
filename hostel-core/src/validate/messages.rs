use std::collections::HashMap;

/// Locale-keyed message bundles used to interpolate constraint templates.
///
/// Lookup walks the requested locales in order, trying the exact tag first
/// and then its language prefix (`pt-br` → `pt`), before falling back to the
/// default locale.
pub struct MessageBundles {
    bundles: HashMap<String, HashMap<String, String>>,
    default_locale: String,
}

impl MessageBundles {
    pub fn new(default_locale: impl Into<String>) -> MessageBundles {
        MessageBundles {
            bundles: HashMap::new(),
            default_locale: default_locale.into(),
        }
    }

    /// The built-in English messages for the standard constraints.
    pub fn builtin() -> MessageBundles {
        let mut bundles = MessageBundles::new("en");
        for (key, message) in [
            ("validation.notnull", "must not be null"),
            ("validation.notempty", "must not be empty"),
            ("validation.size", "size must be between {min} and {max}"),
            ("validation.range", "must be between {min} and {max}"),
            ("validation.pattern", "must match \"{pattern}\""),
            ("validation.invalid", "invalid value"),
        ] {
            bundles.insert("en", key, message);
        }
        bundles
    }

    pub fn insert(&mut self, locale: &str, key: &str, message: &str) {
        self.bundles
            .entry(locale.to_ascii_lowercase())
            .or_default()
            .insert(key.to_string(), message.to_string());
    }

    /// Resolve a key against the locale fallback chain.
    pub fn resolve(&self, locales: &[String], key: &str) -> Option<&str> {
        for locale in locales {
            if let Some(message) = self.lookup(locale, key) {
                return Some(message);
            }
            if let Some((language, _)) = locale.split_once('-') {
                if let Some(message) = self.lookup(language, key) {
                    return Some(message);
                }
            }
        }
        self.lookup(&self.default_locale, key)
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<&str> {
        self.bundles.get(locale).and_then(|b| b.get(key)).map(String::as_str)
    }
}

impl Default for MessageBundles {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Interpolate a message template.
///
/// `{key}` holes are first resolved against the bundles (locale-aware), then
/// against the constraint's attributes. Unresolved holes pass through
/// untouched.
pub fn interpolate(
    template: &str,
    bundles: &MessageBundles,
    locales: &[String],
    attrs: &[(&str, String)],
) -> String {
    let expanded = expand(template, &mut |key| {
        bundles.resolve(locales, key).map(str::to_string)
    });
    expand(&expanded, &mut |key| {
        attrs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.clone())
    })
}

fn expand(template: &str, lookup: &mut dyn FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        match tail.find('}') {
            Some(close) => {
                let key = &tail[..close];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &tail[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}
