//! Media discovery across shadow roots.
//!
//! `querySelectorAll` does not pierce shadow roots, so discovery walks the
//! light tree of a root and recurses into the shadow root of every element
//! that has one. The walk is generic over [`NodeSource`]; the wasm crate
//! implements it on `web_sys` nodes.

use std::collections::HashSet;

use super::state::{FrameKey, MediaKey, MediaState};

/// What a node is, as far as discovery cares.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Media(MediaKey, MediaState),
    Iframe(FrameKey, String),
    Other,
}

/// Read access to a DOM-like tree.
pub trait NodeSource {
    type Node;

    /// Every element below `root` in its own tree, not entering shadow roots.
    fn descendants(&self, root: &Self::Node) -> Vec<Self::Node>;

    /// Open shadow root attached to `node`, if any.
    fn shadow_root(&self, node: &Self::Node) -> Option<Self::Node>;

    fn kind(&self, node: &Self::Node) -> NodeKind;
}

/// Media elements and iframes found in one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovered {
    pub media: Vec<(MediaKey, MediaState)>,
    pub iframes: Vec<(FrameKey, String)>,
}

impl Discovered {
    pub fn is_empty(&self) -> bool {
        self.media.is_empty() && self.iframes.is_empty()
    }
}

/// Collect every media element and iframe under `root`, including those in
/// nested shadow roots.
pub fn collect_media<S: NodeSource>(source: &S, root: &S::Node) -> Discovered {
    let mut found = Discovered::default();
    let mut seen_media = HashSet::new();
    let mut seen_frames = HashSet::new();
    walk(source, root, &mut found, &mut seen_media, &mut seen_frames);
    found
}

fn walk<S: NodeSource>(
    source: &S,
    root: &S::Node,
    found: &mut Discovered,
    seen_media: &mut HashSet<MediaKey>,
    seen_frames: &mut HashSet<FrameKey>,
) {
    for node in source.descendants(root) {
        match source.kind(&node) {
            NodeKind::Media(key, state) => {
                if seen_media.insert(key) {
                    found.media.push((key, state));
                }
            }
            NodeKind::Iframe(key, src) => {
                if seen_frames.insert(key) {
                    found.iframes.push((key, src));
                }
            }
            NodeKind::Other => {}
        }
        if let Some(shadow) = source.shadow_root(&node) {
            walk(source, &shadow, found, seen_media, seen_frames);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Arena tree with separate light children and shadow roots.
    #[derive(Default)]
    pub(crate) struct Tree {
        kinds: Vec<NodeKind>,
        children: Vec<Vec<usize>>,
        shadows: Vec<Option<usize>>,
    }

    impl Tree {
        pub(crate) fn new() -> Self {
            let mut tree = Self::default();
            tree.add(NodeKind::Other);
            tree
        }

        pub(crate) fn add(&mut self, kind: NodeKind) -> usize {
            self.kinds.push(kind);
            self.children.push(Vec::new());
            self.shadows.push(None);
            self.kinds.len() - 1
        }

        pub(crate) fn child(&mut self, parent: usize, kind: NodeKind) -> usize {
            let id = self.add(kind);
            self.children[parent].push(id);
            id
        }

        pub(crate) fn attach_shadow(&mut self, host: usize) -> usize {
            let root = self.add(NodeKind::Other);
            self.shadows[host] = Some(root);
            root
        }
    }

    impl NodeSource for Tree {
        type Node = usize;

        fn descendants(&self, root: &usize) -> Vec<usize> {
            let mut out = Vec::new();
            let mut stack: Vec<usize> = self.children[*root].iter().rev().copied().collect();
            while let Some(node) = stack.pop() {
                out.push(node);
                stack.extend(self.children[node].iter().rev().copied());
            }
            out
        }

        fn shadow_root(&self, node: &usize) -> Option<usize> {
            self.shadows[*node]
        }

        fn kind(&self, node: &usize) -> NodeKind {
            self.kinds[*node].clone()
        }
    }

    fn video(key: MediaKey) -> NodeKind {
        NodeKind::Media(
            key,
            MediaState {
                src: format!("https://cdn/{key}.mp4"),
                ..MediaState::default()
            },
        )
    }

    #[test]
    fn test_collect_light_dom() {
        let mut tree = Tree::new();
        let div = tree.child(0, NodeKind::Other);
        tree.child(div, video(1));
        tree.child(0, NodeKind::Iframe(9, "https://player.vimeo.com/video/1".into()));

        let found = collect_media(&tree, &0);
        assert_eq!(found.media.len(), 1);
        assert_eq!(found.media[0].0, 1);
        assert_eq!(found.iframes, vec![(9, "https://player.vimeo.com/video/1".to_string())]);
    }

    #[test]
    fn test_collect_nested_shadow_roots() {
        let mut tree = Tree::new();
        let host = tree.child(0, NodeKind::Other);
        let shadow = tree.attach_shadow(host);
        let inner_host = tree.child(shadow, video(2));
        let inner_shadow = tree.attach_shadow(inner_host);
        tree.child(inner_shadow, video(3));
        tree.child(inner_shadow, NodeKind::Iframe(4, "https://www.youtube.com/embed/x".into()));

        let found = collect_media(&tree, &0);
        let keys: Vec<_> = found.media.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![2, 3]);
        assert_eq!(found.iframes.len(), 1);
    }

    #[test]
    fn test_empty_document() {
        let tree = Tree::new();
        assert!(collect_media(&tree, &0).is_empty());
    }
}
