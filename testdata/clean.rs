fn first(v: &[u8]) -> u8 {
    v[0]
}
