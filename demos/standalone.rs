use brkalloc::Brkalloc;

fn main() {
    let mut allocator = Brkalloc::new();

    let address = allocator.allocate(1024);
    println!("Requested 1024 bytes of memory");
    println!("Received this address: {address:?}");

    unsafe {
        address.write_bytes(69, 1024);
        println!("First byte after filling the payload: {}", *address);

        let grown = allocator.resize(address, 4096);
        println!("Resized to 4096 bytes, payload now at: {grown:?}");
        println!("First byte is still: {}", *grown);

        let zeroed = allocator.zero_allocate(512, 8);
        println!("Zero allocated 4096 bytes at: {zeroed:?}");
        println!("First byte reads: {}", *zeroed);

        println!("Releasing everything...");
        allocator.release(grown);
        allocator.release(zeroed);
    }
}
