//! Name and path lookups over the decoded directory tree. Lookups that miss return `None`.

use super::tree::Node;

impl<'a, R> Node<'a, R> {
    /// Resolve a `/` separated path.
    ///
    /// `/` and the empty path are the root of the image. Any other path starting with `/` is
    /// resolved from the root, anything else from this node. Every remaining segment must name
    /// a child exactly, so `a//b` and a trailing `/` do not resolve. `.` and `..` have no special
    /// meaning and symlinks are not followed.
    pub fn select(&self, path: &str) -> Option<Self> {
        if path.is_empty() || path == "/" {
            return Some(self.root());
        }
        let (mut cur, rest) = match path.strip_prefix('/') {
            Some(rest) => (self.root(), rest),
            None => (*self, path),
        };
        for name in rest.split('/') {
            cur = cur.child(name)?;
        }
        Some(cur)
    }

    /// The first node called `name` in a depth-first, pre-order walk of this subtree, starting
    /// with this node itself
    pub fn find(&self, name: &str) -> Option<Self> {
        self.walk().find(|n| n.name() == name)
    }

    /// This node and everything below it in depth-first pre-order, each directory's entries in
    /// on-disk order
    pub fn walk(&self) -> Walk<'a, R> {
        Walk { stack: vec![*self] }
    }
}

pub struct Walk<'a, R> {
    stack: Vec<Node<'a, R>>,
}

impl<'a, R> Iterator for Walk<'a, R> {
    type Item = Node<'a, R>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let mark = self.stack.len();
        self.stack.extend(node.children());
        self.stack[mark..].reverse();
        Some(node)
    }
}
