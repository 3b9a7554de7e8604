//! Placeholder replacement for URL and header templates

/// Named-variable substitution applied at request-build time
pub trait Replacer: Send {
    /// Set `name` to `value`, replacing any earlier value
    fn set(&mut self, name: &str, value: &str);

    /// Substitute known placeholders in `template`
    fn replace(&self, template: &str) -> String;
}

/// `{name}` placeholders, values kept in insertion order
///
/// Unknown placeholders are left in the output untouched.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderReplacer {
    values: Vec<(String, String)>,
}

impl PlaceholderReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Names and values in the order they were first set
    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }
}

impl Replacer for PlaceholderReplacer {
    fn set(&mut self, name: &str, value: &str) {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.values.push((name.to_string(), value.to_string())),
        }
    }

    fn replace(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let name = &after[..end];
            match self.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }
}
