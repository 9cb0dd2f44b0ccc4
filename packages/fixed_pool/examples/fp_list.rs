//! Using `FixedPool` as the node storage of a linked list:
//!
//! * Creating a pool and rebinding it to the node type of the list.
//! * Pushing values, each of which takes one slot from the pool.
//! * Popping them back off in reverse order, returning each slot to the pool.
//! * Running out of slots, which is reported as an error (and logged to stderr).

use std::io;
use std::ptr::NonNull;

use fixed_pool::{FixedPool, SlotHandle};
use tracing::Level;

struct Node {
    value: i32,
    next: Option<SlotHandle<Node>>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::DEBUG)
        .init();

    let pool = FixedPool::<i32, 10>::new();

    // The list stores nodes, not bare values, so it needs a pool for its node type.
    let mut nodes = pool
        .rebind::<Node>()
        .expect("a pool of ten nodes fits in memory");

    let mut head: Option<SlotHandle<Node>> = None;

    for value in 0..10 {
        let node = nodes
            .insert(Node {
                value,
                next: head.take(),
            })
            .expect("the pool has room for ten nodes");
        head = Some(node);
    }

    println!(
        "List holds {} nodes, {} slots left in the pool",
        nodes.len(),
        nodes.available()
    );

    // The pool does not grow, so an eleventh node is an error.
    if let Err(error) = nodes.allocate(1) {
        println!("Cannot add another node: {error}");
    }

    while let Some(node) = head {
        let peek: NonNull<Node> = node.ptr();

        // SAFETY: Every node in the list was written by `insert()` and is read only here.
        println!("{}", unsafe { peek.as_ref() }.value);

        // SAFETY: The handle came from this pool and the node in it is initialized.
        let Node { next, .. } = unsafe { nodes.remove(node) };
        head = next;
    }

    println!("List is empty, {} slots available again", nodes.available());
}
