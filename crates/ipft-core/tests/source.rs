//! Loading kernel images and modules from ELF files on disk

mod common;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use common::ImageBuilder;
use ipft_core::error::IpftError;
use ipft_core::{fill_sym2info, resolve, DebugImage, DebugInfoSource, ResolverConfig, SourceConfig, SymInfo, SymsDb};

const RELEASE: &str = "6.1.0-test";

/// One unit per entry of `functions`, each defining `sk_buff` with `mark` at 8.
fn elf_with_functions(functions: &[&str]) -> Vec<u8>
{
    let mut builder = ImageBuilder::new();
    for name in functions {
        let root = builder.add_unit();
        let int = builder.base_type(root, "int", 4);
        let skb = builder.sk_buff(root, 8);
        let skb_ptr = builder.pointer(root, skb);
        builder.subprogram(root, name, &[int, skb_ptr]);
    }
    builder.build_elf()
}

fn write_file(path: &Path, bytes: &[u8])
{
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_load_relocatable_object()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("veth.ko");
    write_file(&path, &elf_with_functions(&["veth_xmit", "veth_poll"]));

    let image = DebugImage::load(&path, "veth").unwrap();
    assert_eq!(image.image_name(), "veth");
    assert_eq!(image.path(), Some(path.as_path()));
    assert_eq!(image.unit_count(), 2);

    // both units decode only if their abbreviation offsets were relocated
    let source = common::source(vec![image]);
    let mut db = SymsDb::new();
    fill_sym2info(&source, &ResolverConfig::default(), &mut db).unwrap();
    assert_eq!(
        db.sorted(),
        vec![("veth_poll", SymInfo::new(2)), ("veth_xmit", SymInfo::new(2))]
    );
    assert_eq!(db.mark_offset(), Some(8));
}

#[test]
fn test_load_object_without_debug_info()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nf_conntrack.ko");
    write_file(&path, &common::elf_without_debug_info());

    let err = DebugImage::load(&path, "nf_conntrack").unwrap_err();
    assert!(matches!(err, IpftError::NoDebugInfo(ref missing) if missing == &path));
}

#[test]
fn test_open_kernel_and_modules_from_search_root()
{
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let modules = root.join(format!("lib/modules/{RELEASE}/kernel"));

    write_file(&root.join(format!("boot/vmlinux-{RELEASE}")), &elf_with_functions(&["ip_rcv"]));
    write_file(&modules.join("drivers/net/veth.ko"), &elf_with_functions(&["veth_xmit"]));
    write_file(&modules.join("net/netfilter/nf_conntrack.ko"), &common::elf_without_debug_info());

    let vxlan = modules.join("drivers/net/vxlan/vxlan.ko.gz");
    fs::create_dir_all(vxlan.parent().unwrap()).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(File::create(&vxlan).unwrap(), flate2::Compression::default());
    encoder.write_all(&elf_with_functions(&["vxlan_xmit"])).unwrap();
    encoder.finish().unwrap();

    let proc_modules = root.join("proc-modules");
    fs::write(
        &proc_modules,
        "veth 32768 0 - Live 0x0\nnf_conntrack 172032 1 - Live 0x0\nvxlan 86016 0 - Live 0x0\nbridge 294912 0 - Live 0x0\n",
    )
    .unwrap();
    let osrelease = root.join("osrelease");
    fs::write(&osrelease, format!("{RELEASE}\n")).unwrap();

    let config = SourceConfig {
        osrelease,
        ..SourceConfig::default()
    }
    .with_debuginfo_path(root.to_string_lossy())
    .with_proc_modules(proc_modules);

    let source = DebugInfoSource::open(&config).unwrap();
    let names: Vec<&str> = source.images().iter().map(DebugImage::image_name).collect();
    // nf_conntrack has no DWARF and bridge has no file; both are skipped
    assert_eq!(names, vec!["vmlinux", "veth", "vxlan"]);
    drop(source);

    let db = resolve(&config, &ResolverConfig::default()).unwrap();
    assert_eq!(
        db.sorted(),
        vec![
            ("ip_rcv", SymInfo::new(2)),
            ("veth_xmit", SymInfo::new(2)),
            ("vxlan_xmit", SymInfo::new(2)),
        ]
    );
    assert_eq!(db.mark_offset(), Some(8));

    let kernel_only = DebugInfoSource::open(&config.clone().with_modules(false)).unwrap();
    assert_eq!(kernel_only.images().len(), 1);
}

#[test]
fn test_open_kernel_without_debug_info_is_source_error()
{
    let dir = tempfile::tempdir().unwrap();
    let vmlinux = dir.path().join("vmlinux");
    write_file(&vmlinux, &common::elf_without_debug_info());

    let config = SourceConfig::default().with_vmlinux(vmlinux).with_modules(false);
    let err = DebugInfoSource::open(&config).unwrap_err();
    assert!(matches!(err, IpftError::SourceOpen(_)));
}
