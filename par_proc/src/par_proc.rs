use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use crossbeam_utils::thread::{Scope, ScopedJoinHandle};
use itertools::Itertools;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

/// A generic processor trait that maps one item to one output and can return
/// an error if the processing of the item fails.
pub trait Proc {
    /// The type of the items to be processed
    type Item;

    /// The type produced for each item
    type Output;

    /// The type of the error produced on a processing failure
    type Err;

    /// Process one item
    fn process(&mut self, item: Self::Item) -> Result<Self::Output, Self::Err>;
}

/// A contiguous run of items, tagged with its position in the input.
struct Chunk<T> {
    index: usize,
    items: Vec<T>,
}

/// Outputs of every chunk a single worker finished, tagged with the chunk index.
type FinishedChunks<O> = Vec<(usize, Vec<O>)>;

/// Raises the abort flag when the worker holding it unwinds.
struct AbortOnPanic<'a>(&'a AtomicBool);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::Relaxed);
        }
    }
}

// Given a receiver (`rec`) that can receive chunks of items of type `T` and a
// `processor` that knows how to process an item of type `T`, this function
// processes all the chunks that the receiver can receive.
fn process<P, T, O>(
    mut processor: P,
    rec: Receiver<Chunk<T>>,
    abort: &AtomicBool,
) -> Result<FinishedChunks<O>>
where
    P: Proc<Item = T, Output = O, Err = anyhow::Error>,
{
    let _guard = AbortOnPanic(abort);
    let mut finished = Vec::new();
    // Block the thread until the next chunk is received; a disconnected
    // channel means there is no more work.
    while let Ok(chunk) = rec.recv() {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let mut outputs = Vec::with_capacity(chunk.items.len());
        for item in chunk.items {
            match processor.process(item) {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    abort.store(true, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
        finished.push((chunk.index, outputs));
    }

    Ok(finished)
}

#[allow(clippy::type_complexity)]
fn start_processors<'a, 'env, P, T, O>(
    processors: Vec<P>,
    scope: &'a Scope<'env>,
    abort: &'env AtomicBool,
) -> (
    Sender<Chunk<T>>,
    Vec<ScopedJoinHandle<'a, Result<FinishedChunks<O>>>>,
)
where
    T: 'env + Send,
    O: 'env + Send,
    P: 'env + Send + Proc<Item = T, Output = O, Err = anyhow::Error>,
{
    // allow a little bit of read-ahead per worker
    let (send, recv) = bounded(2 * processors.len());

    // Make one thread dedicated to each processor object
    let mut handles = Vec::with_capacity(processors.len());
    for processor in processors {
        // Each thread gets a copy of the receiver
        let recv = recv.clone();
        let thread = scope.spawn(move |_| process(processor, recv, abort));
        handles.push(thread);
    }
    (send, handles)
}

fn collect_jobs<O>(
    handles: Vec<ScopedJoinHandle<'_, Result<FinishedChunks<O>>>>,
) -> Result<Vec<FinishedChunks<O>>> {
    // let the threads finish up & return their chunks
    let mut results = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for h in handles {
        // join() Returns Result<Result<P, E>, E>
        match h.join() {
            Ok(Ok(v)) => results.push(v),
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            // if a thread panicked, capture the panic message
            Err(e) => {
                first_err.get_or_insert(anyhow!(decipher_panic(e)));
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Process every item of `iterable` with one of the `processors`, each running
/// on its own thread, and return the outputs in input order.
///
/// Items are dispatched in chunks of `chunk_size`. Every finished chunk is
/// written into a slot reserved for its chunk index, so the order of the
/// returned outputs never depends on which worker finished first. The first
/// error returned by a processor stops the dispatch of further chunks and is
/// returned; a panicking processor is reported as an error.
pub fn process_in_order<I, P, T, O>(
    iterable: I,
    processors: Vec<P>,
    chunk_size: usize,
) -> Result<Vec<O>>
where
    I: IntoIterator<Item = T>,
    T: Send,
    O: Send,
    P: Send + Proc<Item = T, Output = O, Err = anyhow::Error>,
{
    if chunk_size == 0 {
        bail!("chunk size must be positive");
    }
    if processors.is_empty() {
        bail!("at least one processor is required");
    }

    let abort = &AtomicBool::new(false);

    // Scoped threads guarantee to the compiler that the spawned threads are
    // joined before the scope ends, so processors may borrow from the stack.
    let r = crossbeam_utils::thread::scope(move |s| -> Result<Vec<O>> {
        let (send, handles) = start_processors(processors, s, abort);

        let mut n_chunks = 0;
        let chunks = iterable.into_iter().chunks(chunk_size);
        for (index, piece) in chunks.into_iter().enumerate() {
            if abort.load(Ordering::Relaxed) {
                break;
            }
            let send_res = send.send(Chunk {
                index,
                items: piece.collect(),
            });
            // stop sending if all the receivers have hung up
            // go down and get the Error/panic from the dead
            // worker
            if send_res.is_err() {
                break;
            }
            n_chunks += 1;
        }

        // Close the send channel - this will cause the threads to exit
        drop(send);

        let finished = collect_jobs(handles)?;

        let mut slots: Vec<Option<Vec<O>>> = Vec::with_capacity(n_chunks);
        slots.resize_with(n_chunks, || None);
        for (index, outputs) in finished.into_iter().flatten() {
            slots[index] = Some(outputs);
        }
        let mut ordered = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(outputs) => ordered.extend(outputs),
                None => bail!("chunk {index} was dispatched but never processed"),
            }
        }
        Ok(ordered)
    });

    match r {
        Ok(v) => v,
        Err(e) => Err(anyhow!(decipher_panic(e))),
    }
}

/// Process every item of `iterable` on the calling thread, in order.
///
/// This is the single-threaded counterpart of [`process_in_order`] and yields
/// the same outputs for the same processor.
pub fn process_sequential<I, P, T, O>(iterable: I, mut processor: P) -> Result<Vec<O>>
where
    I: IntoIterator<Item = T>,
    P: Proc<Item = T, Output = O, Err = anyhow::Error>,
{
    iterable
        .into_iter()
        .map(|item| processor.process(item))
        .collect()
}

fn decipher_panic(p: Box<dyn Any + 'static + Send>) -> String {
    if let Some(&s) = p.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Ok(s) = p.downcast::<String>() {
        *s
    } else {
        "thread panicked with unrecognized type".to_string()
    }
}
