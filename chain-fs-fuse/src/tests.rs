use std::sync::Arc;
use std::thread;

use chain_fs::{BlockDevice, ChainFileSystem, NUM_DIR_ENTRIES, SECTOR_SIZE};

use crate::{MemDisk, Syscalls};

fn fresh_fs() -> ChainFileSystem {
    let disk: Arc<dyn BlockDevice> = Arc::new(MemDisk::new());
    ChainFileSystem::format(disk)
}

#[test]
fn create_open_write_read() {
    let fs = fresh_fs();

    assert!(fs.create("a", 0));
    {
        let h = fs.open("a").unwrap();
        assert_eq!(h.write_at(0, b"hello"), 5);
    }

    let h2 = fs.open("a").unwrap();
    assert_eq!(h2.length(), 5);
    let mut buf = [0u8; 5];
    assert_eq!(h2.read_at(0, &mut buf), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn cursor_read_write_seek() {
    let fs = fresh_fs();
    assert!(fs.create("cur", 0));

    let mut h = fs.open("cur").unwrap();
    assert_eq!(h.write(b"abcdef"), 6);
    assert_eq!(h.write(b"ghi"), 3);

    h.seek(0);
    let mut buf = [0u8; 9];
    assert_eq!(h.read(&mut buf), 9);
    assert_eq!(&buf, b"abcdefghi");

    h.seek(3);
    let mut buf = [0u8; 3];
    assert_eq!(h.read(&mut buf), 3);
    assert_eq!(&buf, b"def");
}

#[test]
fn read_write_past_eof_yield_zero() {
    let fs = fresh_fs();
    assert!(fs.create("e", 0));

    let h = fs.open("e").unwrap();
    assert_eq!(h.write_at(0, b"xy"), 2);

    let mut buf = [0u8; 4];
    assert_eq!(h.read_at(2, &mut buf), 0);
    assert_eq!(h.read_at(100, &mut buf), 0);
    // 间隔一个字节的写不被接受
    assert_eq!(h.write_at(3, b"z"), 0);
    assert_eq!(h.length(), 2);
}

#[test]
fn unlink_while_open_defers_deletion() {
    let fs = fresh_fs();
    let free_before = fs.free_sectors();

    assert!(fs.create("b", 0));
    let h = fs.open("b").unwrap();

    assert!(!fs.remove("b"));
    assert!(fs.open("b").is_none());

    assert_eq!(h.write_at(0, b"x"), 1);
    drop(h);

    assert!(fs.open("b").is_none());
    assert_eq!(fs.free_sectors(), free_before);
    assert!(fs.check());
}

#[test]
fn file_spans_chained_headers() {
    let fs = fresh_fs();

    let size = 40 * SECTOR_SIZE;
    assert!(fs.create("big", size));

    let h = fs.open("big").unwrap();
    assert_eq!(h.length(), size);
    assert_eq!(h.chain_links(), 2);

    assert!(fs.check());
}

#[test]
fn chained_file_round_trips_data() {
    let fs = fresh_fs();
    assert!(fs.create("blob", 0));

    let payload: Vec<u8> = (0..40 * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();
    let h = fs.open("blob").unwrap();
    assert_eq!(h.write_at(0, &payload), payload.len());

    let mut back = vec![0u8; payload.len()];
    assert_eq!(h.read_at(0, &mut back), payload.len());
    assert_eq!(back, payload);
    assert_eq!(h.chain_links(), 2);
}

#[test]
fn sequential_write_then_read_stress() {
    let fs = fresh_fs();
    let free_before = fs.free_sectors();

    const CONTENTS: &[u8] = b"1234567890";
    const ROUNDS: usize = 500;

    assert!(fs.create("stress", 0));
    {
        let mut h = fs.open("stress").unwrap();
        for _ in 0..ROUNDS {
            assert_eq!(h.write(CONTENTS), CONTENTS.len());
        }
        assert_eq!(h.length(), ROUNDS * CONTENTS.len());

        h.seek(0);
        let mut buf = [0u8; 10];
        for _ in 0..ROUNDS {
            assert_eq!(h.read(&mut buf), CONTENTS.len());
            assert_eq!(&buf, CONTENTS);
        }
    }

    assert!(fs.remove("stress"));
    assert_eq!(fs.free_sectors(), free_before);
    assert!(fs.check());
}

#[test]
fn remove_frees_all_sectors() {
    let fs = fresh_fs();
    let free_before = fs.free_sectors();

    assert!(fs.create("f", 10 * SECTOR_SIZE));
    assert!(fs.free_sectors() < free_before);

    assert!(fs.remove("f"));
    assert_eq!(fs.free_sectors(), free_before);
    assert!(fs.open("f").is_none());
    assert!(fs.check());
}

#[test]
fn create_without_space_is_undone() {
    let fs = fresh_fs();
    let free_before = fs.free_sectors();

    // 数据加上链头超出全盘容量，分配在中途失败
    assert!(!fs.create("huge", 1000 * SECTOR_SIZE));

    assert!(fs.open("huge").is_none());
    assert_eq!(fs.free_sectors(), free_before);
    assert!(fs.check());
}

#[test]
fn directory_fills_up() {
    let fs = fresh_fs();

    for i in 0..NUM_DIR_ENTRIES {
        assert!(fs.create(&format!("f{i}"), 0), "f{i} should fit");
    }
    assert!(!fs.create("overflow", 0));
    assert!(fs.check());
}

#[test]
fn duplicate_and_bad_names_rejected() {
    let fs = fresh_fs();

    assert!(fs.create("dup", 0));
    assert!(!fs.create("dup", 0));
    assert!(!fs.create_dir("dup"));

    assert!(!fs.create(&"x".repeat(26), 0));
    assert!(!fs.create("a/b", 0));
    assert!(!fs.create("", 0));
    assert!(fs.open("a/b").is_none());
}

#[test]
fn hierarchy_navigation() {
    let fs = fresh_fs();

    assert!(fs.create_dir("d"));
    assert!(fs.change_dir("d"));
    assert_eq!(fs.current_dir(), "/d");
    assert!(fs.create("x", 0));

    assert!(fs.change_dir("/"));
    // 本层不支持多段名字
    assert!(fs.open("d/x").is_none());

    assert!(fs.change_dir("/d"));
    assert!(fs.open("x").is_some());

    assert!(fs.change_dir("/"));
    assert!(fs.check());
}

#[test]
fn change_dir_is_idempotent() {
    let fs = fresh_fs();

    assert!(fs.change_dir("/"));
    assert_eq!(fs.current_dir(), "/");

    assert!(fs.create_dir("d"));
    assert!(fs.change_dir("d"));
    assert!(fs.change_dir("/d"));
    assert_eq!(fs.current_dir(), "/d");

    assert!(!fs.change_dir("missing"));
    assert_eq!(fs.current_dir(), "/d");
}

#[test]
fn nested_directories() {
    let fs = fresh_fs();

    assert!(fs.create_dir("a"));
    assert!(fs.change_dir("a"));
    assert!(fs.create_dir("b"));
    assert!(fs.change_dir("b"));
    assert_eq!(fs.current_dir(), "/a/b");
    assert!(fs.create("leaf", 0));

    assert!(fs.change_dir("/"));
    assert!(fs.change_dir("/a/b"));
    assert!(fs.open("leaf").is_some());
    assert_eq!(fs.list(), vec!["leaf".to_owned()]);

    assert!(fs.change_dir("/"));
    assert!(fs.check());
}

#[test]
fn remove_dir_requires_empty() {
    let fs = fresh_fs();

    assert!(fs.create_dir("d"));
    assert!(fs.change_dir("d"));
    assert!(fs.create("x", 0));
    assert!(fs.change_dir("/"));

    assert!(!fs.remove_dir("d"));

    assert!(fs.change_dir("d"));
    assert!(fs.remove("x"));
    assert!(fs.change_dir("/"));

    assert!(fs.remove_dir("d"));
    assert!(fs.open("d").is_none());
    assert!(fs.check());
}

#[test]
fn tombstoned_directory_is_unreachable_until_recreated() {
    let fs = fresh_fs();
    let free_before = fs.free_sectors();

    assert!(fs.create_dir("d"));
    let h = fs.open("d").unwrap();

    assert!(!fs.remove("d"));
    assert!(!fs.change_dir("d"));
    // 切换失败后线程的工作目录原样保留
    assert_eq!(fs.current_dir(), "/");
    drop(h);

    assert_eq!(fs.free_sectors(), free_before);
    assert!(fs.create_dir("d"));
    assert!(fs.change_dir("d"));
    assert!(fs.check());
}

#[test]
fn format_mount_format_is_stable() {
    let disk = Arc::new(MemDisk::new());

    let fs = ChainFileSystem::format(Arc::clone(&disk) as Arc<dyn BlockDevice>);
    drop(fs);
    let image_after_format = disk.image();

    let fs = ChainFileSystem::mount(Arc::clone(&disk) as Arc<dyn BlockDevice>);
    assert!(fs.check());
    drop(fs);
    assert_eq!(disk.image(), image_after_format);

    let fs = ChainFileSystem::format(Arc::clone(&disk) as Arc<dyn BlockDevice>);
    drop(fs);
    assert_eq!(disk.image(), image_after_format);
}

#[test]
fn data_survives_remount() {
    let disk = Arc::new(MemDisk::new());

    {
        let fs = ChainFileSystem::format(Arc::clone(&disk) as Arc<dyn BlockDevice>);
        assert!(fs.create_dir("d"));
        assert!(fs.change_dir("d"));
        assert!(fs.create("keep", 0));
        let h = fs.open("keep").unwrap();
        assert_eq!(h.write_at(0, b"persisted"), 9);
    }

    let fs = ChainFileSystem::mount(Arc::clone(&disk) as Arc<dyn BlockDevice>);
    assert!(fs.check());
    assert!(fs.change_dir("/d"));
    let h = fs.open("keep").unwrap();
    let mut buf = [0u8; 9];
    assert_eq!(h.read_at(0, &mut buf), 9);
    assert_eq!(&buf, b"persisted");
}

#[test]
fn concurrent_readers_single_writer() {
    let fs = Arc::new(fresh_fs());

    const PAYLOAD: usize = 2 * SECTOR_SIZE;
    assert!(fs.create("shared", 0));
    {
        let h = fs.open("shared").unwrap();
        assert_eq!(h.write_at(0, &[b'A'; PAYLOAD]), PAYLOAD);
    }

    let writer = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let h = fs.open("shared").unwrap();
            let mut last = b'A';
            for round in 0..40u8 {
                last = b'A' + (round % 4);
                assert_eq!(h.write_at(0, &[last; PAYLOAD]), PAYLOAD);
            }
            fs.release_thread();
            last
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let h = fs.open("shared").unwrap();
                let mut buf = vec![0u8; PAYLOAD];
                for _ in 0..80 {
                    assert_eq!(h.read_at(0, &mut buf), PAYLOAD);
                    // 写者独占期间读者止步：读到的负载永远不是两轮写的拼接
                    let first = buf[0];
                    assert!(buf.iter().all(|&b| b == first), "torn read observed");
                }
                fs.release_thread();
            })
        })
        .collect();

    let last = writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    let h = fs.open("shared").unwrap();
    let mut buf = vec![0u8; PAYLOAD];
    assert_eq!(h.read_at(0, &mut buf), PAYLOAD);
    assert!(buf.iter().all(|&b| b == last));
    assert!(fs.check());
}

#[test]
fn concurrent_creates_do_not_double_allocate() {
    let fs = Arc::new(fresh_fs());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let name = format!("w{i}");
                assert!(fs.create(&name, SECTOR_SIZE * (i + 1)));
                let h = fs.open(&name).unwrap();
                assert_eq!(h.write_at(0, &[i as u8; 16]), 16);
                fs.release_thread();
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    for i in 0..4usize {
        let h = fs.open(&format!("w{i}")).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(h.read_at(0, &mut buf), 16);
        assert_eq!(buf, [i as u8; 16]);
    }
    assert!(fs.check());
}

#[test]
fn threads_keep_separate_working_directories() {
    let fs = Arc::new(fresh_fs());
    assert!(fs.create_dir("a"));
    assert!(fs.create_dir("b"));

    let t1 = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            assert!(fs.change_dir("/a"));
            assert!(fs.create("f", 0));
            let h = fs.open("f").unwrap();
            assert_eq!(h.write_at(0, b"from a"), 6);
            drop(h);
            fs.release_thread();
        })
    };
    let t2 = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            assert!(fs.change_dir("/b"));
            assert!(fs.create("f", 0));
            let h = fs.open("f").unwrap();
            assert_eq!(h.write_at(0, b"from b"), 6);
            drop(h);
            fs.release_thread();
        })
    };
    t1.join().unwrap();
    t2.join().unwrap();

    let mut buf = [0u8; 6];
    assert!(fs.change_dir("/a"));
    let h = fs.open("f").unwrap();
    h.read_at(0, &mut buf);
    assert_eq!(&buf, b"from a");
    drop(h);

    assert!(fs.change_dir("/b"));
    let h = fs.open("f").unwrap();
    h.read_at(0, &mut buf);
    assert_eq!(&buf, b"from b");
    drop(h);

    assert!(fs.check());
}

#[test]
fn syscall_surface_round_trip() {
    let sys = Syscalls::new(fresh_fs());

    assert_eq!(sys.create("file", 0), 0);
    let fd = sys.open("file");
    assert!(fd >= 0);
    assert_eq!(sys.write(fd, b"hello"), 5);
    assert_eq!(sys.close(fd), 0);
    assert_eq!(sys.close(fd), -1);

    let fd = sys.open("file");
    let mut buf = [0u8; 5];
    assert_eq!(sys.read(fd, &mut buf), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(sys.read(99, &mut buf), -1);
    assert_eq!(sys.close(fd), 0);

    assert_eq!(sys.create_dir("d"), 0);
    assert_eq!(sys.change_dir("d"), 0);
    assert!(sys.list().is_empty());
    assert_eq!(sys.change_dir("/"), 0);
    assert_eq!(sys.remove("file"), 0);
    assert_eq!(sys.remove_dir("d"), 0);
    assert_eq!(sys.remove("missing"), -1);
}
