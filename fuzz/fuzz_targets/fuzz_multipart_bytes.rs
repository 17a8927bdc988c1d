#![no_main]

use std::convert::Infallible;

use futures_util::stream;
use libfuzzer_sys::fuzz_target;
use partflow::bytes::Bytes;
use partflow::Multipart;
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    // The first byte picks the fragmentation, the rest is the body.
    let (step, body) = match data.split_first() {
        Some((step, body)) => (usize::from(*step).max(1), body.to_vec()),
        None => return,
    };

    let chunks = body
        .chunks(step)
        .map(|chunk| Result::<Bytes, Infallible>::Ok(Bytes::copy_from_slice(chunk)))
        .collect::<Vec<_>>();

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async {
        let mut multipart = Multipart::new(stream::iter(chunks), "X-BOUNDARY");

        while let Ok(Some(part)) = multipart.next_part().await {
            let _ = part.bytes().await;
        }
    })
});
