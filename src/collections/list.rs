//! Doubly linked list with nodes stored in a slot arena.
//!
//! Nodes are addressed by generational [`NodeId`]s, so unlinking a node given
//! its id is O(1) and a stale id simply resolves to nothing.

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Stable handle to a list node
    pub struct NodeId;
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

pub struct List<T> {
    nodes: SlotMap<NodeId, Node<T>>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
    eq: fn(&T, &T) -> bool,
}

impl<T: PartialEq> List<T> {
    pub fn new() -> Self {
        Self::with_eq(<T as PartialEq>::eq)
    }
}

impl<T: PartialEq> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> List<T> {
    /// Create a list that matches values in `find`/`delete` with `eq`.
    pub fn with_eq(eq: fn(&T, &T) -> bool) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: None,
            tail: None,
            len: 0,
            eq,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<NodeId> {
        self.head
    }

    pub fn last(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn next(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.next
    }

    pub fn prev(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.prev
    }

    pub fn get(&self, node: NodeId) -> Option<&T> {
        self.nodes.get(node).map(|n| &n.value)
    }

    /// Append at the tail
    pub fn push_back(&mut self, value: T) -> NodeId {
        let id = self.nodes.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    /// Insert at the head
    pub fn push_front(&mut self, value: T) -> NodeId {
        let id = self.nodes.insert(Node {
            value,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(head) => self.nodes[head].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
        id
    }

    /// First node, scanning from the head, whose value matches `value`
    pub fn find(&self, value: &T) -> Option<NodeId> {
        let mut cur = self.head;
        while let Some(id) = cur {
            let node = &self.nodes[id];
            if (self.eq)(&node.value, value) {
                return Some(id);
            }
            cur = node.next;
        }
        None
    }

    /// Unlink `node` and hand its value back to the caller.
    pub fn remove(&mut self, node: NodeId) -> Option<T> {
        let Node { value, prev, next } = self.nodes.remove(node)?;
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
        Some(value)
    }

    /// Remove the first node matching `value`
    pub fn delete(&mut self, value: &T) -> Option<T> {
        let node = self.find(value)?;
        self.remove(node)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        self.remove(head)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cur: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }
}

pub struct Iter<'a, T> {
    list: &'a List<T>,
    cur: Option<NodeId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.nodes.get(self.cur?)?;
        self.cur = node.next;
        Some(&node.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Object, Robj};
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn collect(list: &List<i32>) -> Vec<i32> {
        list.iter().copied().collect()
    }

    fn backwards(list: &List<i32>) -> Vec<i32> {
        let mut out = Vec::new();
        let mut cur = list.last();
        while let Some(id) = cur {
            out.push(*list.get(id).unwrap());
            cur = list.prev(id);
        }
        out
    }

    #[test]
    fn test_empty_list() {
        let list: List<i32> = List::new();
        assert_eq!(list.len(), 0);
        assert!(list.first().is_none());
        assert!(list.last().is_none());
    }

    #[test]
    fn test_append_and_push_front() {
        let mut list = List::new();
        list.push_back(2);
        list.push_back(3);
        list.push_front(1);
        assert_eq!(list.len(), 3);
        assert_eq!(collect(&list), vec![1, 2, 3]);
        assert_eq!(backwards(&list), vec![3, 2, 1]);
    }

    #[test]
    fn test_remove_head_tail_interior() {
        let mut list = List::new();
        let a = list.push_back(1);
        let b = list.push_back(2);
        let c = list.push_back(3);
        let d = list.push_back(4);

        assert_eq!(list.remove(b), Some(2));
        assert_eq!(collect(&list), vec![1, 3, 4]);
        assert_eq!(list.next(a), Some(c));
        assert_eq!(list.prev(c), Some(a));

        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.first(), Some(c));
        assert_eq!(list.prev(c), None);

        assert_eq!(list.remove(d), Some(4));
        assert_eq!(list.last(), Some(c));
        assert_eq!(list.next(c), None);

        assert_eq!(list.remove(c), Some(3));
        assert!(list.is_empty());
        assert!(list.first().is_none() && list.last().is_none());
    }

    #[test]
    fn test_stale_node_is_ignored() {
        let mut list = List::new();
        let a = list.push_back(1);
        list.push_back(2);
        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(a), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_find_and_delete_with_custom_eq() {
        let mut list: List<(u8, &str)> = List::with_eq(|a, b| a.0 == b.0);
        list.push_back((1, "one"));
        list.push_back((2, "two"));
        let found = list.find(&(2, "ignored")).unwrap();
        assert_eq!(list.get(found), Some(&(2, "two")));
        assert_eq!(list.delete(&(1, "")), Some((1, "one")));
        assert_eq!(list.delete(&(9, "")), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_queue_holds_object_references() {
        let obj: Robj = Object::string("+OK\r\n");
        let mut list = List::new();
        list.push_back(Rc::clone(&obj));
        assert_eq!(Rc::strong_count(&obj), 2);
        drop(list.pop_front());
        assert_eq!(Rc::strong_count(&obj), 1);
    }

    #[derive(Clone, Debug)]
    enum Op {
        PushBack(i32),
        PushFront(i32),
        Remove(usize),
    }

    fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
        let op = prop_oneof![
            any::<i32>().prop_map(Op::PushBack),
            any::<i32>().prop_map(Op::PushFront),
            any::<usize>().prop_map(Op::Remove),
        ];
        proptest::collection::vec(op, 1..80)
    }

    // The list mirrors a VecDeque model under random append/push-front/delete-by-node.
    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
        #[test]
        fn prop_matches_deque(ops in arb_ops()) {
            let mut sut = List::new();
            let mut model: VecDeque<(NodeId, i32)> = VecDeque::new();
            for op in ops {
                match op {
                    Op::PushBack(v) => {
                        let id = sut.push_back(v);
                        model.push_back((id, v));
                    }
                    Op::PushFront(v) => {
                        let id = sut.push_front(v);
                        model.push_front((id, v));
                    }
                    Op::Remove(i) => {
                        if !model.is_empty() {
                            let (id, v) = model.remove(i % model.len()).unwrap();
                            prop_assert_eq!(sut.remove(id), Some(v));
                        }
                    }
                }
                prop_assert_eq!(sut.len(), model.len());
                prop_assert_eq!(sut.iter().count(), model.len());
                prop_assert_eq!(sut.first().is_none(), model.is_empty());
                prop_assert_eq!(sut.last().is_none(), model.is_empty());
                let values: Vec<i32> = model.iter().map(|(_, v)| *v).collect();
                prop_assert_eq!(collect(&sut), values.clone());
                let mut rev = values;
                rev.reverse();
                prop_assert_eq!(backwards(&sut), rev);
            }
        }
    }
}
