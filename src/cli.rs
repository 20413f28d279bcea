use clap::{value_parser, crate_version, Arg, ArgAction, Command, ValueHint};

const SUB_HELP: &str = "containers hold several volumes, select one using indices separated by `/`,
e.g., `1/0` is the first volume inside the second volume of the outer container";
const F_LONG_HELP: &str = "for files this is the usual notion of a path, directories are separated by `/`,
for blocks it is the block number in decimal, or hex with `$` or `0x` prefix";
const T_LONG_HELP: &str = "`data` and `rsrc` select a file fork, `block` selects a raw block of the volume";
const FTYPE_LONG_HELP: &str = "ProDOS file type as a mnemonic (e.g. `bin`, `txt`, `sys`) or a number,
hex numbers use `$` or `0x` prefix";

fn file_arg(help: &'static str, req: bool) -> Arg {
    Arg::new("file").short('f').long("file").value_name("PATH").required(req).help(help)
}

fn indent_arg() -> Arg {
    Arg::new("indent").long("indent").help("JSON indentation, omit to minify")
        .value_name("SPACES")
        .value_parser(value_parser!(u16).range(0..16))
        .required(false)
}

fn dimg_arg() -> Arg {
    Arg::new("dimg").short('d').long("dimg").help("path to disk image itself")
        .value_name("PATH")
        .value_hint(ValueHint::FilePath)
        .required(true)
}

fn sub_arg() -> Arg {
    Arg::new("sub").short('s').long("sub").help("select a volume inside a container")
        .value_name("INDICES")
        .long_help(SUB_HELP)
        .required(false)
}

fn depth_arg() -> Arg {
    Arg::new("max-depth").long("max-depth").help("bound on directory nesting")
        .value_name("LEVELS")
        .value_parser(value_parser!(usize))
        .required(false)
}

fn strict_arg() -> Arg {
    Arg::new("strict").long("strict").help("treat blocks marked used but not owned as an error")
        .action(ArgAction::SetTrue)
}

fn read_only_arg() -> Arg {
    Arg::new("read-only").long("read-only").help("refuse every change to the image")
        .action(ArgAction::SetTrue)
}

/// Subcommand that works on a path inside an existing image
fn modifier(name: &'static str, about: &'static str, file_help: &'static str) -> Command {
    Command::new(name)
        .arg(file_arg(file_help,true))
        .arg(dimg_arg())
        .arg(sub_arg())
        .arg(strict_arg())
        .arg(depth_arg())
        .arg(read_only_arg())
        .about(about)
}

pub fn build_cli() -> Command {
    let long_help = "a2vfs is always invoked with exactly one of several subcommands.
The subcommands are generally designed to function as nodes in a pipeline.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
create DOS image:      `a2vfs mkdsk -o dos33 -v 254 -t do -d myimg.do`
create ProDOS image:   `a2vfs mkdsk -o prodos -v disk.new -k 3.5in -t po -d myimg.po`
file to image:         `cat prog.bin | a2vfs put -f /sub/prog -d myimg.po`
image to file:         `a2vfs get -f /sub/prog -d myimg.po > prog.bin`
volume in container:   `a2vfs catalog -s 2 -d bigimg.hdv`
check allocations:     `a2vfs audit --indent 2 -d myimg.po`";

    let img_types = ["do", "po", "2mg"];
    let os_names = ["dos33", "prodos"];
    let disk_kinds = ["5.25in", "5.25in-40", "3.5in", "hdmax"];
    let get_put_types = ["data", "rsrc", "block"];

    let mut main_cmd = Command::new("a2vfs")
        .about("Read and write file systems inside Apple II disk images.")
        .after_long_help(long_help)
        .version(crate_version!());

    main_cmd = main_cmd.subcommand(
        Command::new("mkdsk")
            .arg(Arg::new("volume").short('v').long("volume").help("volume name or number")
                .value_name("VOLUME").required(false))
            .arg(Arg::new("type").short('t').long("type").help("type of disk image to create")
                .value_name("TYPE").required(true).value_parser(img_types))
            .arg(Arg::new("os").short('o').long("os").help("operating system format")
                .value_name("OS").required(true).value_parser(os_names))
            .arg(Arg::new("kind").short('k').long("kind").help("kind of disk")
                .value_name("SIZE").value_parser(disk_kinds).required(false).default_value("5.25in"))
            .arg(Arg::new("dimg").short('d').long("dimg").help("disk image path to create")
                .value_name("PATH").value_hint(ValueHint::FilePath).required(true))
            .about("write a blank disk image to the given path")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("stat")
            .arg(dimg_arg())
            .arg(sub_arg())
            .arg(indent_arg())
            .arg(depth_arg())
            .arg(read_only_arg())
            .about("write volume information as JSON, including nested volumes")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("catalog")
            .arg(file_arg("path of directory inside disk image",false))
            .arg(dimg_arg())
            .arg(sub_arg())
            .arg(depth_arg())
            .arg(read_only_arg())
            .visible_aliases(["ls", "dir", "cat"])
            .about("write disk image catalog to stdout")
            .after_help("containers list their volumes instead")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("tree")
            .arg(dimg_arg())
            .arg(sub_arg())
            .arg(indent_arg())
            .arg(depth_arg())
            .arg(read_only_arg())
            .arg(Arg::new("meta").long("meta").help("include metadata").action(ArgAction::SetTrue))
            .about("write directory tree as JSON")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("audit")
            .arg(dimg_arg())
            .arg(sub_arg())
            .arg(indent_arg())
            .arg(depth_arg())
            .arg(read_only_arg())
            .arg(strict_arg())
            .about("compare the allocation bitmap with what the file system actually uses")
            .after_help("exits with an error if the volume would refuse to be modified")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("get")
            .arg(file_arg("path or block number inside disk image",true).long_help(F_LONG_HELP))
            .arg(Arg::new("type").long("type").short('t').help("type of the item")
                .value_name("TYPE").required(false).value_parser(get_put_types).long_help(T_LONG_HELP))
            .arg(dimg_arg())
            .arg(sub_arg())
            .arg(depth_arg())
            .arg(read_only_arg())
            .about("read from disk image, write to stdout")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("put")
            .arg(file_arg("path or block number inside disk image",true).long_help(F_LONG_HELP))
            .arg(Arg::new("type").long("type").short('t').help("type of the item")
                .value_name("TYPE").required(false).value_parser(get_put_types).long_help(T_LONG_HELP))
            .arg(Arg::new("ftype").long("ftype").help("file type of a new file")
                .value_name("FTYPE").required(false).long_help(FTYPE_LONG_HELP))
            .arg(Arg::new("aux").long("aux").short('a').help("auxiliary type of a new file")
                .value_name("AUX").required(false))
            .arg(Arg::new("unique").long("unique").help("generate a new name rather than rewrite an existing file")
                .action(ArgAction::SetTrue))
            .arg(dimg_arg())
            .arg(sub_arg())
            .arg(strict_arg())
            .arg(depth_arg())
            .arg(read_only_arg())
            .about("read from stdin, write to disk image")
    );
    main_cmd = main_cmd.subcommand(modifier("mkdir","create a new directory inside a disk image",
        "path inside disk image of new directory"));
    main_cmd = main_cmd.subcommand(modifier("delete","delete a file or empty directory inside a disk image",
        "path inside disk image to delete").visible_aliases(["del", "era"]));
    main_cmd = main_cmd.subcommand(modifier("lock","write protect a file or directory inside a disk image",
        "path inside disk image to lock"));
    main_cmd = main_cmd.subcommand(modifier("unlock","remove write protection from a file or directory inside a disk image",
        "path inside disk image to unlock"));
    main_cmd = main_cmd.subcommand(modifier("rename","rename a file or directory inside a disk image",
        "path inside disk image to rename")
        .arg(Arg::new("name").short('n').long("name").help("new name").value_name("NAME").required(true)));
    main_cmd = main_cmd.subcommand(modifier("retype","change file type inside a disk image",
        "path inside disk image to retype")
        .arg(Arg::new("type").short('t').long("type").help("file type, code or mnemonic")
            .value_name("TYPE").required(true).long_help(FTYPE_LONG_HELP))
        .arg(Arg::new("aux").short('a').long("aux").help("auxiliary type")
            .value_name("AUX").required(true)));
    main_cmd = main_cmd.subcommand(
        Command::new("completions")
            .arg(Arg::new("shell").short('s').long("shell").help("shell type")
                .value_name("SHELL").required(true).value_parser(["bash", "elv", "fish", "ps1", "zsh"]))
            .about("write completions script to stdout")
    );
    main_cmd
}
