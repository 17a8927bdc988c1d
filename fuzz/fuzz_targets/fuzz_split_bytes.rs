#![no_main]

use std::convert::Infallible;

use futures_util::stream::{self, StreamExt};
use libfuzzer_sys::fuzz_target;
use partflow::bytes::Bytes;
use partflow::Split;
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    let chunks = data
        .chunks(3)
        .map(|chunk| Result::<Bytes, Infallible>::Ok(Bytes::copy_from_slice(chunk)))
        .collect::<Vec<_>>();

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async {
        let mut split = Split::new(stream::iter(chunks), "\r\n").expect("delimiter");
        let mut joined = Vec::new();

        while let Some(Ok(segment)) = split.next().await {
            if let Ok(bytes) = segment.bytes().await {
                joined.extend_from_slice(&bytes);
            }
        }

        assert!(joined.len() <= data.len());
    })
});
