#![no_main]

use libfuzzer_sys::fuzz_target;
use dotemit::loader::LoadedModule;

fuzz_target!(|data: &[u8]| {
    let _ = LoadedModule::from_mem(data.to_vec());
});
