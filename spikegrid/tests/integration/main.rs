// Integration tests follow the organization suggested by Matklad:
// https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod builtin_nodes;
mod kernel_coupling;
mod kernel_delivery;
mod kernel_failure;
mod kernel_multi_rank;
