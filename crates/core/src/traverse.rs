//! Walk a property path through annotated values.

use crate::path::{PathComponent, PropertyPath};
use crate::value::{PropertyMap, PropertyValue};

/// Visit `root` and every node along `path`, wrappers included.
///
/// Each wrapper is visited before it is unwrapped, so a known output shows up
/// as the `Output` node followed by its element. `Computed` and unknown
/// outputs end the branch. A wildcard fans out over every array element.
/// Paths that do not match the value shape simply stop; nothing is reported.
pub fn traverse<'a, F>(root: &'a PropertyValue, path: &PropertyPath, mut visitor: F)
where
    F: FnMut(&'a PropertyValue),
{
    walk(root, path.components(), &mut visitor);
}

/// Like [`traverse`] with an implicit object root that is not itself visited.
pub(crate) fn traverse_map<'a, F>(props: &'a PropertyMap, path: &PropertyPath, mut visitor: F)
where
    F: FnMut(&'a PropertyValue),
{
    if let Some((PathComponent::Key(k), tail)) = path.components().split_first() {
        if let Some(child) = props.get(k) {
            walk(child, tail, &mut visitor);
        }
    }
}

fn walk<'a, F>(v: &'a PropertyValue, rest: &[PathComponent], visitor: &mut F)
where
    F: FnMut(&'a PropertyValue),
{
    visitor(v);
    match v {
        PropertyValue::Computed(_) => return,
        PropertyValue::Output(o) if !o.known => return,
        PropertyValue::Output(o) => return walk(&o.element, rest, visitor),
        PropertyValue::Secret(inner) => return walk(inner, rest, visitor),
        _ => {}
    }
    let Some((head, tail)) = rest.split_first() else { return };
    match (head, v) {
        (PathComponent::Key(k), PropertyValue::Object(map)) => {
            if let Some(child) = map.get(k) {
                walk(child, tail, visitor);
            }
        }
        (PathComponent::Index(i), PropertyValue::Array(items)) => {
            if let Some(child) = items.get(*i) {
                walk(child, tail, visitor);
            }
        }
        (PathComponent::Wildcard, PropertyValue::Array(items)) => {
            for child in items {
                walk(child, tail, visitor);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> PropertyValue { PropertyValue::string(v) }
    fn computed(v: PropertyValue) -> PropertyValue { PropertyValue::computed(v) }
    fn unknown() -> PropertyValue { PropertyValue::unknown_output(false, []) }
    fn known(v: PropertyValue) -> PropertyValue { PropertyValue::known_output(v, false, []) }
    fn secret(v: PropertyValue) -> PropertyValue { PropertyValue::secret(v) }
    fn array(vs: Vec<PropertyValue>) -> PropertyValue { PropertyValue::Array(vs) }
    fn object(entries: Vec<(&str, PropertyValue)>) -> PropertyValue { PropertyValue::object(entries) }

    /// Collect everything visited below the root; asserts the root came first.
    fn visited(props: Vec<(&str, PropertyValue)>, path: &str) -> Vec<PropertyValue> {
        let root = object(props);
        let path = PropertyPath::parse(path).unwrap();
        let mut seen = Vec::new();
        traverse(&root, &path, |v| seen.push(v.clone()));
        assert_eq!(seen.first(), Some(&root), "root must be visited first");
        seen.remove(0);
        seen
    }

    #[test]
    fn object_lookups() {
        assert_eq!(visited(vec![("a", s("a")), ("b", s("b"))], "a"), vec![s("a")]);
        assert_eq!(visited(vec![], "a"), Vec::<PropertyValue>::new());
        assert_eq!(visited(vec![("a", PropertyValue::Null)], "a"), vec![PropertyValue::Null]);
    }

    #[test]
    fn wrappers_are_visited_before_their_element() {
        assert_eq!(visited(vec![("a", computed(s("a")))], "a"), vec![computed(s("a"))]);
        assert_eq!(visited(vec![("a", unknown())], "a"), vec![unknown()]);
        assert_eq!(visited(vec![("a", known(s("a")))], "a"), vec![known(s("a")), s("a")]);
        assert_eq!(visited(vec![("a", secret(s("a")))], "a"), vec![secret(s("a")), s("a")]);
    }

    #[test]
    fn nested_objects_through_wrappers() {
        let inner = object(vec![("b", s("b"))]);
        assert_eq!(visited(vec![("a", inner.clone())], "a.b"), vec![inner.clone(), s("b")]);
        assert_eq!(
            visited(vec![("a", secret(inner.clone()))], "a.b"),
            vec![secret(inner.clone()), inner.clone(), s("b")]
        );
        assert_eq!(
            visited(vec![("a", known(inner.clone()))], "a.b"),
            vec![known(inner.clone()), inner, s("b")]
        );
    }

    #[test]
    fn unknowns_stop_descent() {
        let empty = PropertyValue::Object(PropertyMap::new());
        assert_eq!(visited(vec![("a", computed(empty.clone()))], "a.b"), vec![computed(empty)]);
        assert_eq!(visited(vec![("a", unknown())], "a.b"), vec![unknown()]);
    }

    #[test]
    fn array_indices_and_wildcards() {
        assert_eq!(visited(vec![("a", array(vec![]))], "a"), vec![array(vec![])]);
        let bc = array(vec![s("b"), s("c")]);
        assert_eq!(visited(vec![("a", bc.clone())], "a[1]"), vec![bc.clone(), s("c")]);
        assert_eq!(visited(vec![("a", bc.clone())], "a[*]"), vec![bc.clone(), s("b"), s("c")]);
        assert_eq!(visited(vec![("a", bc.clone())], "a[7]"), vec![bc]);
    }

    #[test]
    fn array_elements_keep_their_wrappers() {
        let arr = array(vec![known(s("b"))]);
        assert_eq!(visited(vec![("a", arr.clone())], "a[0]"), vec![arr, known(s("b")), s("b")]);

        let arr = array(vec![unknown()]);
        assert_eq!(visited(vec![("a", arr.clone())], "a[0].b"), vec![arr, unknown()]);

        let inner = object(vec![("b", s("b"))]);
        let arr = array(vec![secret(inner.clone())]);
        assert_eq!(
            visited(vec![("a", arr.clone())], "a[0].b"),
            vec![arr, secret(inner.clone()), inner, s("b")]
        );
    }

    #[test]
    fn mismatched_shapes_visit_nothing_further() {
        assert_eq!(visited(vec![("a", s("a"))], "a.b"), vec![s("a")]);
        assert_eq!(visited(vec![("a", s("a"))], "a[0]"), vec![s("a")]);
        let obj = object(vec![("b", s("b"))]);
        assert_eq!(visited(vec![("a", obj.clone())], "a[*]"), vec![obj]);
    }
}
